use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;

use crate::report::{FileOutcome, FileStatus};
use crate::update::Updater;

/// Runs `updater` over every file with up to `jobs` worker threads.
///
/// With `fail_fast`, files not yet started when a script fails are reported as
/// cancelled. The first `Err` from any worker stops all workers and is
/// returned. Outcomes come back sorted by path.
pub fn run_batch(
    updater: &Updater<'_>,
    files: &[PathBuf],
    jobs: usize,
    fail_fast: bool,
) -> Result<Vec<FileOutcome>> {
    let mut out: Vec<FileOutcome> = Vec::with_capacity(files.len());

    if jobs <= 1 || files.len() <= 1 {
        let mut failed = false;
        for file in files {
            if failed && fail_fast {
                out.push(FileOutcome::cancelled(file));
                continue;
            }
            let outcome = updater.process(file)?;
            if outcome.status == FileStatus::Failed {
                failed = true;
            }
            out.push(outcome);
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        return Ok(out);
    }

    let next = AtomicUsize::new(0);
    let failed = AtomicBool::new(false);
    let results: Mutex<Vec<FileOutcome>> = Mutex::new(Vec::with_capacity(files.len()));
    let first_err: Mutex<Option<anyhow::Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        let jobs = jobs.min(files.len());
        for _ in 0..jobs {
            scope.spawn(|| loop {
                if let Ok(guard) = first_err.lock() {
                    if guard.is_some() {
                        return;
                    }
                }
                let idx = next.fetch_add(1, Ordering::Relaxed);
                if idx >= files.len() {
                    return;
                }
                let file = &files[idx];
                let outcome = if fail_fast && failed.load(Ordering::Acquire) {
                    Ok(FileOutcome::cancelled(file))
                } else {
                    updater.process(file)
                };
                match outcome {
                    Ok(r) => {
                        if r.status == FileStatus::Failed {
                            failed.store(true, Ordering::Release);
                        }
                        if let Ok(mut guard) = results.lock() {
                            guard.push(r);
                        }
                    }
                    Err(err) => {
                        if let Ok(mut guard) = first_err.lock() {
                            if guard.is_none() {
                                *guard = Some(err);
                            }
                        }
                        return;
                    }
                }
            });
        }
    });

    if let Some(err) = first_err.into_inner().unwrap_or_else(|e| e.into_inner()) {
        return Err(err);
    }
    out = results.into_inner().unwrap_or_else(|e| e.into_inner());

    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}
