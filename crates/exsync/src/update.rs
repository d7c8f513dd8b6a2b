use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use exsync_contracts::{EXSYNC_SEGMENTS_SCHEMA_VERSION, SCRATCH_DIR_PREFIX, SKIP_DIRECTIVE};
use exsync_host_runner::{run_script_file, RunnerConfig, RunnerResult};
use exsync_script::listing::{numbered_listing, traceback_lines};
use exsync_script::{
    format_segments, inject_markers, rewrite_script, segment_output, split_statements,
    AnnotationBlock, Cleaned, Cleaner, ConsistencyError, Instrumented, PipelineRun, StatementSpan,
    SyntaxError,
};
use serde::Serialize;

use crate::config::Settings;
use crate::issues::{IssueRecord, IssuesLog};
use crate::report::{FileOutcome, FileStatus, Mode};
use crate::util::{display_path, sha256_hex, write_atomic};

const INSTRUMENTED_FILE: &str = "instrumented.py";

/// Why a script was not processed. Not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Missing,
    WrongExtension { expected: String },
    NotUtf8,
    TooShort { lines: usize, min_lines: usize },
    RecursiveInvocation,
    OptedOut,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Missing => f.write_str("file does not exist"),
            ValidationError::WrongExtension { expected } => {
                write!(f, "not a .{expected} file")
            }
            ValidationError::NotUtf8 => f.write_str("file is not valid UTF-8"),
            ValidationError::TooShort { lines, min_lines } => write!(
                f,
                "only {lines} non-blank line(s), need at least {min_lines}"
            ),
            ValidationError::RecursiveInvocation => {
                f.write_str("script invokes exsync itself")
            }
            ValidationError::OptedOut => write!(f, "opted out with `{SKIP_DIRECTIVE}`"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Scratch directory for `script`: `.exsync-<stem>/` next to it.
pub fn scratch_dir_for(script: &Path) -> PathBuf {
    let stem = script
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "script".to_string());
    let parent = match script.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    parent.join(format!("{SCRATCH_DIR_PREFIX}{stem}"))
}

#[derive(Debug, Serialize)]
struct SegmentsDump<'a> {
    schema_version: &'static str,
    script: String,
    nonce: &'a str,
    sentinels: &'a [String],
    segments: Vec<SegmentEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct SegmentEntry<'a> {
    span_index: usize,
    span: &'a StatementSpan,
    raw_text: &'a str,
    annotation: &'a [String],
}

/// Runs the pipeline over single scripts. Shared read-only by batch workers.
pub struct Updater<'a> {
    settings: &'a Settings,
    mode: Mode,
    issues: &'a IssuesLog,
    cleaner: Cleaner,
}

enum Failure {
    Syntax(SyntaxError),
    Execution {
        message: String,
        result: Box<RunnerResult>,
        listing: String,
    },
}

impl<'a> Updater<'a> {
    pub fn new(settings: &'a Settings, mode: Mode, issues: &'a IssuesLog) -> Self {
        let cleaner = Cleaner::new(settings.style.clone())
            .with_legacy_prefixes(settings.legacy_prefixes.clone())
            .with_artifact_patterns(settings.legacy_artifact_patterns.clone());
        Self {
            settings,
            mode,
            issues,
            cleaner,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Processes one script.
    ///
    /// Validation, syntax and execution problems come back as an outcome; an
    /// `Err` is reserved for pipeline inconsistencies and harness failures
    /// that should stop the whole batch.
    pub fn process(&self, path: &Path) -> Result<FileOutcome> {
        let start = Instant::now();
        let mut outcome = self.process_inner(path)?;
        outcome.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            path = %path.display(),
            status = outcome.status.as_str(),
            elapsed_ms = outcome.elapsed_ms,
            "processed script"
        );
        Ok(outcome)
    }

    fn process_inner(&self, path: &Path) -> Result<FileOutcome> {
        let original = match self.validate(path)? {
            Ok(text) => text,
            Err(reason) => {
                tracing::info!(path = %path.display(), %reason, "skipping script");
                return Ok(FileOutcome::new(path, FileStatus::Skipped).with_reason(reason.to_string()));
            }
        };
        let sha_before = sha256_hex(original.as_bytes());

        let cleaned = match self.cleaner.clean(&original) {
            Ok(c) => c,
            Err(err) => return self.fail(path, &sha_before, Failure::Syntax(err)),
        };
        tracing::debug!(
            path = %path.display(),
            removed_annotations = cleaned.removed_annotations,
            removed_artifacts = cleaned.removed_artifacts,
            "cleaned"
        );

        if self.mode == Mode::Strip {
            return self.finish(path, &original, &sha_before, &cleaned.source, None, None);
        }

        let spans = match split_statements(&cleaned.source) {
            Ok(spans) => spans,
            Err(err) => return self.fail(path, &sha_before, Failure::Syntax(err)),
        };
        let mut run = PipelineRun::new(&cleaned.source);
        let instrumented = inject_markers(&cleaned.source, &spans, &mut run);
        tracing::debug!(
            path = %path.display(),
            spans = spans.len(),
            markers = run.markers_issued(),
            "instrumented"
        );

        let scratch = scratch_dir_for(path);
        self.prepare_scratch(&scratch, &cleaned, &instrumented)?;

        let result = match self.execute(path, &scratch) {
            Ok(r) => r,
            Err(err) if self.settings.skip_spawn_errors => {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "interpreter failed to start");
                let record = IssueRecord {
                    path: path.to_path_buf(),
                    stage: "spawn",
                    message: format!("{err:#}"),
                    ..IssueRecord::default()
                };
                self.issues.append(&record)?;
                let mut out = FileOutcome::new(path, FileStatus::Failed)
                    .with_reason(format!("{err:#}"));
                out.sha256_before = Some(sha_before);
                return Ok(out);
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %format!("{err:#}"), "interpreter failed to start");
                return Err(err);
            }
        };
        tracing::debug!(
            path = %path.display(),
            exit_code = result.exit_status,
            elapsed_ms = result.elapsed_ms,
            "executed"
        );
        std::fs::write(scratch.join("output.txt"), &result.stdout)
            .with_context(|| format!("write scratch output: {}", scratch.display()))?;
        std::fs::write(scratch.join("stderr.txt"), &result.stderr)
            .with_context(|| format!("write scratch stderr: {}", scratch.display()))?;

        if !result.ok {
            let message = match (&result.trap, result.exit_signal) {
                (Some(trap), _) => format!("script stopped: {trap}"),
                (None, Some(sig)) => format!("script killed by signal {sig}"),
                (None, None) => format!("script exited with status {}", result.exit_status),
            };
            let listing = self.listing(&cleaned.source, &instrumented, &result);
            return self.fail(
                path,
                &sha_before,
                Failure::Execution {
                    message,
                    result: Box::new(result),
                    listing,
                },
            );
        }

        if let Err(err) = segment_output(&mut run, &result.stdout_text(), &instrumented.sentinels) {
            let listing = self.listing(&cleaned.source, &instrumented, &result);
            return self.fail(
                path,
                &sha_before,
                Failure::Execution {
                    message: err.to_string(),
                    result: Box::new(result),
                    listing,
                },
            );
        }
        if run.segments().len() != instrumented.sentinels.len() {
            return Err(ConsistencyError::SegmentCount {
                segments: run.segments().len(),
                markers: instrumented.sentinels.len(),
            })
            .with_context(|| format!("segment {}", path.display()));
        }

        let blocks = format_segments(run.segments(), &self.settings.style);
        self.dump_segments(&scratch, path, &run, &instrumented, &spans, &blocks)?;

        let rewritten = rewrite_script(&cleaned.source, &spans, &blocks, &self.settings.style)
            .with_context(|| format!("rewrite {}", path.display()))?;
        tracing::debug!(path = %path.display(), blocks = blocks.len(), "merged");

        self.finish(
            path,
            &original,
            &sha_before,
            &rewritten,
            Some(spans.len()),
            Some(&scratch),
        )
    }

    /// Outer `Err` is an I/O failure; inner `Err` means skip the script.
    fn validate(&self, path: &Path) -> Result<std::result::Result<String, ValidationError>> {
        if !path.is_file() {
            return Ok(Err(ValidationError::Missing));
        }
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.settings.extension);
        if !ext_ok {
            return Ok(Err(ValidationError::WrongExtension {
                expected: self.settings.extension.clone(),
            }));
        }
        let bytes = std::fs::read(path).with_context(|| format!("read: {}", path.display()))?;
        let Ok(text) = String::from_utf8(bytes) else {
            return Ok(Err(ValidationError::NotUtf8));
        };

        if text.lines().any(|l| l.trim() == SKIP_DIRECTIVE) {
            return Ok(Err(ValidationError::OptedOut));
        }
        if self.settings.recursion_guard.is_match(&text) {
            return Ok(Err(ValidationError::RecursiveInvocation));
        }
        let lines = text
            .lines()
            .filter(|l| !l.trim().is_empty() && !self.settings.style.is_annotation_line(l))
            .count();
        if lines < self.settings.min_lines {
            return Ok(Err(ValidationError::TooShort {
                lines,
                min_lines: self.settings.min_lines,
            }));
        }
        Ok(Ok(text))
    }

    fn prepare_scratch(&self, scratch: &Path, cleaned: &Cleaned, instrumented: &Instrumented) -> Result<()> {
        if scratch.exists() {
            std::fs::remove_dir_all(scratch)
                .with_context(|| format!("remove stale scratch dir: {}", scratch.display()))?;
        }
        std::fs::create_dir_all(scratch)
            .with_context(|| format!("create scratch dir: {}", scratch.display()))?;
        std::fs::write(scratch.join("cleaned.py"), cleaned.source.as_bytes())
            .with_context(|| format!("write scratch: {}", scratch.display()))?;
        std::fs::write(scratch.join(INSTRUMENTED_FILE), instrumented.source.as_bytes())
            .with_context(|| format!("write scratch: {}", scratch.display()))?;
        Ok(())
    }

    fn execute(&self, path: &Path, scratch: &Path) -> Result<RunnerResult> {
        let script_dir = scratch
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let script_dir = std::fs::canonicalize(&script_dir)
            .with_context(|| format!("canonicalize: {}", script_dir.display()))?;
        let scratch_abs = script_dir.join(
            scratch
                .file_name()
                .context("scratch dir has no file name")?,
        );
        let config = RunnerConfig {
            interpreter: self.settings.interpreter.clone(),
            timeout_secs: self.settings.timeout_secs,
            max_output_bytes: self.settings.max_output_bytes,
            module_dirs: vec![scratch_abs.clone(), script_dir.clone()],
            work_dir: Some(script_dir),
            extra_env: Vec::new(),
        };
        run_script_file(&config, &scratch_abs.join(INSTRUMENTED_FILE))
            .with_context(|| format!("run {}", path.display()))
    }

    /// Listing of the cleaned script with traceback lines highlighted.
    fn listing(&self, cleaned: &str, instrumented: &Instrumented, result: &RunnerResult) -> String {
        let highlight: Vec<usize> = traceback_lines(&result.stderr_text(), INSTRUMENTED_FILE)
            .into_iter()
            .filter_map(|l| instrumented.line_map.original_line(l))
            .collect();
        numbered_listing(cleaned, &highlight)
    }

    fn dump_segments(
        &self,
        scratch: &Path,
        path: &Path,
        run: &PipelineRun,
        instrumented: &Instrumented,
        spans: &[StatementSpan],
        blocks: &[AnnotationBlock],
    ) -> Result<()> {
        let segments = run
            .segments()
            .iter()
            .filter_map(|seg| {
                let span = spans.get(seg.span_index)?;
                let annotation = blocks
                    .iter()
                    .find(|b| b.span_index == seg.span_index)
                    .map(|b| b.lines.as_slice())
                    .unwrap_or(&[]);
                Some(SegmentEntry {
                    span_index: seg.span_index,
                    span,
                    raw_text: &seg.raw_text,
                    annotation,
                })
            })
            .collect();
        let dump = SegmentsDump {
            schema_version: EXSYNC_SEGMENTS_SCHEMA_VERSION,
            script: display_path(path),
            nonce: run.nonce(),
            sentinels: &instrumented.sentinels,
            segments,
        };
        let json = serde_json::to_string_pretty(&dump)? + "\n";
        std::fs::write(scratch.join("segments.json"), json.as_bytes())
            .with_context(|| format!("write scratch: {}", scratch.display()))?;
        Ok(())
    }

    fn finish(
        &self,
        path: &Path,
        original: &str,
        sha_before: &str,
        new_text: &str,
        spans: Option<usize>,
        scratch: Option<&Path>,
    ) -> Result<FileOutcome> {
        let changed = new_text != original;
        let mut out = FileOutcome::new(path, FileStatus::Unchanged);
        out.spans = spans;
        out.sha256_before = Some(sha_before.to_string());
        out.sha256_after = Some(sha256_hex(new_text.as_bytes()));

        match self.mode {
            Mode::Check => {
                if changed {
                    out.status = FileStatus::Stale;
                    out.reason = Some("annotations are out of date".to_string());
                }
            }
            Mode::Update | Mode::Strip if self.settings.verbose => {
                // Strip runs nothing, so it has no scratch dir yet.
                let dir = scratch.map_or_else(|| scratch_dir_for(path), Path::to_path_buf);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("create scratch dir: {}", dir.display()))?;
                std::fs::write(dir.join("rewritten.py"), new_text.as_bytes())
                    .with_context(|| format!("write scratch: {}", dir.display()))?;
                out.scratch_dir = Some(display_path(&dir));
                if changed {
                    out.status = FileStatus::Updated;
                    out.reason = Some("verbose: original left untouched".to_string());
                }
            }
            Mode::Update | Mode::Strip => {
                if changed {
                    write_atomic(path, new_text.as_bytes())?;
                    out.status = FileStatus::Updated;
                    out.written = true;
                }
            }
        }

        if let Some(dir) = scratch {
            if self.settings.verbose {
                out.scratch_dir = Some(display_path(dir));
            } else {
                std::fs::remove_dir_all(dir)
                    .with_context(|| format!("remove scratch dir: {}", dir.display()))?;
            }
        }
        Ok(out)
    }

    /// Records a per-script failure. The script is left untouched and the
    /// scratch dir is kept for inspection.
    fn fail(&self, path: &Path, sha_before: &str, failure: Failure) -> Result<FileOutcome> {
        let mut out = FileOutcome::new(path, FileStatus::Failed);
        out.sha256_before = Some(sha_before.to_string());
        let record = match failure {
            Failure::Syntax(err) => {
                tracing::warn!(path = %path.display(), line = err.line, "syntax error");
                out.reason = Some(err.to_string());
                IssueRecord {
                    path: path.to_path_buf(),
                    stage: "syntax",
                    message: err.to_string(),
                    ..IssueRecord::default()
                }
            }
            Failure::Execution {
                message,
                result,
                listing,
            } => {
                tracing::warn!(
                    path = %path.display(),
                    exit_code = result.exit_status,
                    trap = result.trap.as_deref().unwrap_or(""),
                    "execution failed"
                );
                out.reason = Some(message.clone());
                out.exit_code = Some(result.exit_status);
                out.trap = result.trap.clone();
                let scratch = scratch_dir_for(path);
                if scratch.is_dir() {
                    out.scratch_dir = Some(display_path(&scratch));
                }
                IssueRecord {
                    path: path.to_path_buf(),
                    stage: "execution",
                    message,
                    exit_code: Some(result.exit_status),
                    signal: result.exit_signal,
                    trap: result.trap.clone(),
                    stderr: Some(result.stderr_text()),
                    stderr_truncated: result.stderr_truncated,
                    listing: Some(listing),
                }
            }
        };
        self.issues.append(&record)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigArgs;

    fn settings(dir: &Path) -> Settings {
        Settings::resolve(&ConfigArgs::default(), dir, None).unwrap()
    }

    fn write_text(path: &Path, contents: &str) {
        std::fs::write(path, contents.as_bytes()).unwrap();
    }

    #[test]
    fn scratch_dir_sits_next_to_script() {
        assert_eq!(
            scratch_dir_for(Path::new("book/ch1/loops.py")),
            PathBuf::from("book/ch1/.exsync-loops")
        );
        assert_eq!(scratch_dir_for(Path::new("a.py")), PathBuf::from("./.exsync-a"));
    }

    #[test]
    fn validation_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let log = IssuesLog::new(dir.path().join("issues.log"));
        let up = Updater::new(&s, Mode::Update, &log);

        let cases = [
            ("missing.py", None, "does not exist"),
            ("notes.txt", Some("print(1)\n"), "not a .py file"),
            ("blank.py", Some("\n   \n#| old\n"), "only 0 non-blank"),
            ("skip.py", Some("# exsync: skip\nprint(1)\n"), "opted out"),
            ("rec.py", Some("import os\nos.system('exsync update .')\n"), "invokes exsync"),
        ];
        for (name, contents, needle) in cases {
            let p = dir.path().join(name);
            if let Some(c) = contents {
                write_text(&p, c);
            }
            let out = up.process(&p).unwrap();
            assert_eq!(out.status, FileStatus::Skipped, "{name}");
            let reason = out.reason.unwrap_or_default();
            assert!(reason.contains(needle), "{name}: {reason}");
        }
        assert!(!log.path().exists(), "skips are not failures");
    }

    #[test]
    fn verbose_strip_leaves_the_original_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.verbose = true;
        let log = IssuesLog::new(dir.path().join("issues.log"));
        let up = Updater::new(&s, Mode::Strip, &log);

        let p = dir.path().join("v.py");
        write_text(&p, "print(1)\n#| 1\n");
        let out = up.process(&p).unwrap();
        assert_eq!(out.status, FileStatus::Updated);
        assert!(!out.written);
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "print(1)\n#| 1\n");
        let rewritten = scratch_dir_for(&p).join("rewritten.py");
        assert_eq!(std::fs::read_to_string(rewritten).unwrap(), "print(1)\n");
    }

    #[test]
    fn strip_mode_removes_annotations_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.interpreter = PathBuf::from("exsync-no-such-interpreter");
        let log = IssuesLog::new(dir.path().join("issues.log"));
        let up = Updater::new(&s, Mode::Strip, &log);

        let p = dir.path().join("a.py");
        write_text(&p, "print('foo')\n#| foo\n");
        let out = up.process(&p).unwrap();
        assert_eq!(out.status, FileStatus::Updated);
        assert!(out.written);
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "print('foo')\n");

        let out = up.process(&p).unwrap();
        assert_eq!(out.status, FileStatus::Unchanged);
        assert_eq!(out.sha256_before, out.sha256_after);
    }

    #[test]
    fn syntax_errors_fail_and_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        let log = IssuesLog::new(dir.path().join("issues.log"));
        let up = Updater::new(&s, Mode::Update, &log);

        let p = dir.path().join("bad.py");
        let src = "print('unterminated)\n";
        write_text(&p, src);
        let out = up.process(&p).unwrap();
        assert_eq!(out.status, FileStatus::Failed);
        assert_eq!(std::fs::read_to_string(&p).unwrap(), src);
        let logged = std::fs::read_to_string(log.path()).unwrap();
        assert!(logged.contains("bad.py"), "{logged}");
        assert!(logged.contains("stage: syntax"), "{logged}");
    }

    #[test]
    fn spawn_errors_abort_unless_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.interpreter = PathBuf::from("exsync-no-such-interpreter");
        let log = IssuesLog::new(dir.path().join("issues.log"));
        let p = dir.path().join("a.py");
        write_text(&p, "print(1)\n");

        let up = Updater::new(&s, Mode::Update, &log);
        assert!(up.process(&p).is_err());

        s.skip_spawn_errors = true;
        let up = Updater::new(&s, Mode::Update, &log);
        let out = up.process(&p).unwrap();
        assert_eq!(out.status, FileStatus::Failed);
        let logged = std::fs::read_to_string(log.path()).unwrap();
        assert!(logged.contains("stage: spawn"), "{logged}");
    }
}
