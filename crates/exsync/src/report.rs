use std::path::Path;

use exsync_contracts::EXSYNC_UPDATE_REPORT_SCHEMA_VERSION;
use serde::Serialize;

use crate::util::display_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Update,
    Check,
    Strip,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Update => "update",
            Mode::Check => "check",
            Mode::Strip => "strip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Updated,
    Unchanged,
    Stale,
    Skipped,
    Failed,
    Cancelled,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Updated => "updated",
            FileStatus::Unchanged => "unchanged",
            FileStatus::Stale => "stale",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: String,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the original script was rewritten on disk.
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spans: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trap: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
    pub elapsed_ms: u64,
}

impl FileOutcome {
    pub fn new(path: &Path, status: FileStatus) -> Self {
        Self {
            path: display_path(path),
            status,
            reason: None,
            written: false,
            spans: None,
            exit_code: None,
            trap: None,
            sha256_before: None,
            sha256_after: None,
            scratch_dir: None,
            elapsed_ms: 0,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn cancelled(path: &Path) -> Self {
        Self::new(path, FileStatus::Cancelled)
            .with_reason("not run: an earlier script failed (fail-fast)")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub stale: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl Summary {
    pub fn from_outcomes(files: &[FileOutcome]) -> Self {
        let mut s = Summary {
            total: files.len() as u64,
            ..Summary::default()
        };
        for f in files {
            match f.status {
                FileStatus::Updated => s.updated += 1,
                FileStatus::Unchanged => s.unchanged += 1,
                FileStatus::Stale => s.stale += 1,
                FileStatus::Skipped => s.skipped += 1,
                FileStatus::Failed => s.failed += 1,
                FileStatus::Cancelled => s.cancelled += 1,
            }
        }
        s
    }

    pub fn exit_code(&self) -> u8 {
        if self.failed + self.stale + self.cancelled > 0 {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub schema_version: &'static str,
    pub mode: Mode,
    pub ok: bool,
    pub files: Vec<FileOutcome>,
    pub summary: Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues_log: Option<String>,
}

impl UpdateReport {
    pub fn new(mode: Mode, files: Vec<FileOutcome>, issues_log: Option<&Path>) -> Self {
        let summary = Summary::from_outcomes(&files);
        Self {
            schema_version: EXSYNC_UPDATE_REPORT_SCHEMA_VERSION,
            mode,
            ok: summary.exit_code() == 0,
            files,
            summary,
            issues_log: issues_log.map(display_path),
        }
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        for f in &self.files {
            if f.status == FileStatus::Unchanged {
                continue;
            }
            out.push_str(&format!("{:<9} {}", f.status.as_str(), f.path));
            if let Some(reason) = &f.reason {
                out.push_str(&format!(" ({reason})"));
            }
            out.push('\n');
        }
        let s = &self.summary;
        out.push_str(&format!(
            "{}: {} file(s): {} updated, {} unchanged, {} stale, {} skipped, {} failed, {} cancelled\n",
            self.mode.as_str(),
            s.total,
            s.updated,
            s.unchanged,
            s.stale,
            s.skipped,
            s.failed,
            s.cancelled
        ));
        if s.failed > 0 {
            if let Some(log) = &self.issues_log {
                out.push_str(&format!("details: {log}\n"));
            }
        }
        out
    }
}
