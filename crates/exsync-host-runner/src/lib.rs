use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;
pub const STDERR_CAP_BYTES: usize = 256 * 1024;

pub const TRAP_WALL_TIMEOUT: &str = "wall timeout";
pub const TRAP_STDOUT_CAP: &str = "stdout exceeded cap";

/// Interpreter used when nothing else is configured.
pub fn default_interpreter() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("python")
    } else {
        PathBuf::from("python3")
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub interpreter: PathBuf,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Prepended to `PYTHONPATH`, in order.
    pub module_dirs: Vec<PathBuf>,
    /// Child working directory. `None` inherits ours.
    pub work_dir: Option<PathBuf>,
    pub extra_env: Vec<(String, String)>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            module_dirs: Vec::new(),
            work_dir: None,
            extra_env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerResult {
    pub ok: bool,
    pub exit_status: i32,
    pub exit_signal: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stderr_truncated: bool,
    pub trap: Option<String>,
    pub elapsed_ms: u64,
}

impl RunnerResult {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

struct ChildOutput {
    exit_status: i32,
    exit_signal: Option<i32>,
    timed_out: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: bool,
    stderr_truncated: bool,
}

/// Runs `script` with the configured interpreter and captures its output.
///
/// `Err` means the child could not be run at all (missing interpreter, pipe
/// failure). A script that ran and failed is `Ok` with `ok == false`.
pub fn run_script_file(config: &RunnerConfig, script: &Path) -> Result<RunnerResult> {
    let start = Instant::now();
    let out = run_child(config, script)?;
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let trap = if out.timed_out {
        Some(TRAP_WALL_TIMEOUT.to_string())
    } else if out.stdout_truncated {
        Some(TRAP_STDOUT_CAP.to_string())
    } else {
        None
    };

    Ok(RunnerResult {
        ok: trap.is_none() && out.exit_status == 0,
        exit_status: out.exit_status,
        exit_signal: out.exit_signal,
        stdout: out.stdout,
        stderr: out.stderr,
        stderr_truncated: out.stderr_truncated,
        trap,
        elapsed_ms,
    })
}

fn python_path(config: &RunnerConfig) -> Result<OsString> {
    let mut dirs: Vec<PathBuf> = config.module_dirs.clone();
    if let Some(existing) = std::env::var_os("PYTHONPATH") {
        dirs.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(dirs).context("join PYTHONPATH")
}

fn run_child(config: &RunnerConfig, script: &Path) -> Result<ChildOutput> {
    let script_abs = std::fs::canonicalize(script)
        .with_context(|| format!("canonicalize script path: {}", script.display()))?;

    let mut child = {
        let mut cmd = Command::new(&config.interpreter);
        cmd.arg(&script_abs);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env("PYTHONPATH", python_path(config)?);
        cmd.env("PYTHONIOENCODING", "utf-8");
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.env("PYTHONDONTWRITEBYTECODE", "1");
        for (k, v) in &config.extra_env {
            cmd.env(k, v);
        }
        if let Some(dir) = &config.work_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt as _;
            cmd.process_group(0);
        }

        cmd.spawn().with_context(|| {
            format!(
                "spawn interpreter {} for {}",
                config.interpreter.display(),
                script.display()
            )
        })?
    };

    let stdout = child.stdout.take().context("take stdout")?;
    let stderr = child.stderr.take().context("take stderr")?;

    let stdout_cap = config.max_output_bytes;
    let stdout_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stdout, stdout_cap)
    });
    let stderr_thread = std::thread::spawn(move || -> std::io::Result<(Vec<u8>, bool)> {
        read_to_end_capped(stderr, STDERR_CAP_BYTES)
    });

    let deadline = Instant::now().checked_add(Duration::from_secs(config.timeout_secs));
    let (status, mut timed_out) = wait_child_until(&mut child, deadline)?;
    // Anything the script left running may still hold the pipes open.
    if !wait_readers_until(&stdout_thread, &stderr_thread, deadline) {
        kill_child_tree(&mut child);
        timed_out = true;
    }
    let (stdout_bytes, stdout_truncated) = stdout_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))?;
    let (stderr_bytes, stderr_truncated) = stderr_thread
        .join()
        .unwrap_or_else(|_| Ok((Vec::new(), false)))?;

    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt as _;
        status.signal()
    };
    #[cfg(not(unix))]
    let exit_signal: Option<i32> = None;

    let exit_status = match status.code() {
        Some(code) => code,
        None => exit_signal.map(|s| 128 + s).unwrap_or(1),
    };
    Ok(ChildOutput {
        exit_status,
        exit_signal,
        timed_out,
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait_child_until(
    child: &mut std::process::Child,
    deadline: Option<Instant>,
) -> Result<(std::process::ExitStatus, bool)> {
    loop {
        if let Some(status) = child.try_wait().context("try_wait child")? {
            return Ok((status, false));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            kill_child_tree(child);
            let status = child.wait().context("wait child after kill")?;
            return Ok((status, true));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Returns `false` if either reader is still blocked at `deadline`.
fn wait_readers_until<T>(
    stdout: &std::thread::JoinHandle<T>,
    stderr: &std::thread::JoinHandle<T>,
    deadline: Option<Instant>,
) -> bool {
    loop {
        if stdout.is_finished() && stderr.is_finished() {
            return true;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Kills the child's process group, which also reaches grandchildren that
/// outlived the child itself.
fn kill_child_tree(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // The child leads its own process group.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
}

pub fn read_to_end_capped<R: Read>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            break;
        }

        if truncated {
            continue;
        }

        let remaining = cap.saturating_sub(buf.len());
        if n <= remaining {
            buf.extend_from_slice(&tmp[..n]);
        } else {
            buf.extend_from_slice(&tmp[..remaining]);
            truncated = true;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_read_keeps_prefix_and_flags_truncation() {
        let data = vec![b'x'; 20_000];
        let (buf, truncated) = read_to_end_capped(&data[..], 10_000).unwrap();
        assert_eq!(buf.len(), 10_000);
        assert!(truncated);

        let (buf, truncated) = read_to_end_capped(&b"hello"[..], 10).unwrap();
        assert_eq!(buf, b"hello");
        assert!(!truncated);
    }

    #[test]
    fn exact_cap_is_not_truncation() {
        let (buf, truncated) = read_to_end_capped(&b"12345"[..], 5).unwrap();
        assert_eq!(buf.len(), 5);
        assert!(!truncated);
    }

    #[test]
    fn python_path_puts_module_dirs_first() {
        let cfg = RunnerConfig {
            module_dirs: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            ..RunnerConfig::default()
        };
        let joined = python_path(&cfg).unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&joined).collect();
        assert_eq!(parts[0], PathBuf::from("/a"));
        assert_eq!(parts[1], PathBuf::from("/b"));
    }

    #[test]
    fn missing_interpreter_is_an_error_not_a_failed_run() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.py");
        std::fs::write(&script, "print(1)\n").unwrap();
        let cfg = RunnerConfig {
            interpreter: PathBuf::from("exsync-no-such-interpreter"),
            ..RunnerConfig::default()
        };
        let err = run_script_file(&cfg, &script).unwrap_err();
        assert!(format!("{err:#}").contains("spawn interpreter"), "{err:#}");
    }
}
