use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

/// One failed script, as written to the issues log.
#[derive(Debug, Clone, Default)]
pub struct IssueRecord {
    pub path: PathBuf,
    pub stage: &'static str,
    pub message: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub trap: Option<String>,
    pub stderr: Option<String>,
    pub stderr_truncated: bool,
    pub listing: Option<String>,
}

impl IssueRecord {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== {} ===", self.path.display());
        let _ = writeln!(out, "stage: {}", self.stage);
        let _ = writeln!(out, "error: {}", self.message);
        if let Some(code) = self.exit_code {
            let _ = writeln!(out, "exit code: {code}");
        }
        if let Some(sig) = self.signal {
            let _ = writeln!(out, "signal: {sig}");
        }
        if let Some(trap) = &self.trap {
            let _ = writeln!(out, "trap: {trap}");
        }
        if let Some(stderr) = self.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str("--- stderr ---\n");
            out.push_str(stderr);
            if !stderr.ends_with('\n') {
                out.push('\n');
            }
            if self.stderr_truncated {
                out.push_str("[stderr truncated]\n");
            }
        }
        if let Some(listing) = &self.listing {
            out.push_str("--- listing ---\n");
            out.push_str(listing);
        }
        out.push('\n');
        out
    }
}

/// Append-only issues log shared by all workers; the mutex keeps records
/// from interleaving.
#[derive(Debug)]
pub struct IssuesLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IssuesLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &IssueRecord) -> Result<()> {
        let text = record.render();
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir: {}", parent.display()))?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open issues log: {}", self.path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("write issues log: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_render_all_present_sections() {
        let rec = IssueRecord {
            path: PathBuf::from("ch1/boom.py"),
            stage: "execution",
            message: "script exited with status 1".to_string(),
            exit_code: Some(1),
            stderr: Some("ZeroDivisionError: division by zero".to_string()),
            listing: Some(">> 1 | 1 / 0\n".to_string()),
            ..IssueRecord::default()
        };
        let text = rec.render();
        assert!(text.starts_with("=== ch1/boom.py ===\nstage: execution\n"), "{text}");
        assert!(text.contains("exit code: 1\n"));
        assert!(!text.contains("trap:"));
        assert!(text.contains("--- stderr ---\nZeroDivisionError: division by zero\n"));
        assert!(text.contains("--- listing ---\n>> 1 | 1 / 0\n"));
        assert!(!text.contains("signal:"));
        assert!(!text.contains("[stderr truncated]"));
    }

    #[test]
    fn killed_scripts_note_signal_and_truncation() {
        let rec = IssueRecord {
            path: PathBuf::from("loud.py"),
            stage: "execution",
            message: "script killed by signal 9".to_string(),
            exit_code: Some(137),
            signal: Some(9),
            stderr: Some("x".repeat(16)),
            stderr_truncated: true,
            ..IssueRecord::default()
        };
        let text = rec.render();
        assert!(text.contains("exit code: 137\nsignal: 9\n"), "{text}");
        assert!(text.contains("xxxxxxxxxxxxxxxx\n[stderr truncated]\n"), "{text}");
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let log = IssuesLog::new(dir.path().join("logs/issues.log"));
        std::thread::scope(|scope| {
            for i in 0..8 {
                let log = &log;
                scope.spawn(move || {
                    let rec = IssueRecord {
                        path: PathBuf::from(format!("s{i}.py")),
                        stage: "syntax",
                        message: "x".repeat(4096),
                        ..IssueRecord::default()
                    };
                    log.append(&rec).unwrap();
                });
            }
        });
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.matches("=== ").count(), 8);
        for block in text.split("=== ").filter(|b| !b.is_empty()) {
            assert!(block.contains("stage: syntax\nerror: "), "{block}");
        }
    }
}
