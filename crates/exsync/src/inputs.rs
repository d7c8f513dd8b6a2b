use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use exsync_contracts::SCRATCH_DIR_PREFIX;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

const GLOB_META: &[char] = &['*', '?', '[', '{'];

fn should_walk_dir_entry(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() || entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with(SCRATCH_DIR_PREFIX) {
        return false;
    }
    !matches!(
        name.as_ref(),
        ".git" | "target" | "__pycache__" | ".venv" | "node_modules"
    )
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == extension)
}

fn is_glob(input: &str) -> bool {
    input.contains(GLOB_META)
}

fn compile_globset(globs: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for g in globs {
        builder.add(Glob::new(g).with_context(|| format!("invalid glob: {g:?}"))?);
    }
    builder.build().context("build globset")
}

/// Leading components of `pattern` that contain no glob syntax.
fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for comp in Path::new(pattern).components() {
        if comp.as_os_str().to_string_lossy().contains(GLOB_META) {
            break;
        }
        base.push(comp);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(should_walk_dir_entry)
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(move |e| {
            let path = e.into_path();
            match path.strip_prefix(".") {
                Ok(rel) if root == Path::new(".") => rel.to_path_buf(),
                _ => path,
            }
        })
}

/// Expands files, directories and glob patterns into a sorted, deduplicated
/// list of scripts.
///
/// Directories contribute files with `extension`; globs contribute every file
/// they match. A plain path that does not exist is passed through so the
/// updater can report it as missing.
pub fn collect_inputs(inputs: &[String], extension: &str) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = Vec::new();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            for file in walk_files(&path) {
                if has_extension(&file, extension) && seen.insert(file.clone()) {
                    out.push(file);
                }
            }
            continue;
        }
        if is_glob(input) && !path.exists() {
            let set = compile_globset(&[input.as_str()])?;
            let base = glob_base(input);
            let mut matched = false;
            for file in walk_files(&base) {
                if set.is_match(&file) {
                    matched = true;
                    if seen.insert(file.clone()) {
                        out.push(file);
                    }
                }
            }
            if !matched {
                tracing::warn!(pattern = %input, "glob matched no files");
            }
            continue;
        }
        if seen.insert(path.clone()) {
            out.push(path);
        }
    }

    if out.is_empty() {
        anyhow::bail!("no *.{extension} inputs found");
    }

    out.sort();
    Ok(out)
}
