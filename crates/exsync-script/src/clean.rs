use std::sync::LazyLock;

use regex::Regex;

use crate::format::{has_annotation_prefix, AnnotationStyle};
use crate::lex::{lex, LineKind};
use crate::split::SyntaxError;
use crate::text::SourceLines;

/// A marker statement left behind by an interrupted earlier run.
static MARKER_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:__import__\(\s*['"]builtins['"]\s*\)\.)?print\(\s*(?:'<<exsync:[0-9a-f]+:\d+>>'|"<<exsync:[0-9a-f]+:\d+>>")\s*(?:,\s*flush\s*=\s*True\s*)?\)\s*;?\s*$"#,
    )
    .expect("marker statement regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleaned {
    pub source: String,
    pub removed_annotations: usize,
    pub removed_artifacts: usize,
}

impl Cleaned {
    pub fn changed(&self) -> bool {
        self.removed_annotations + self.removed_artifacts > 0
    }
}

/// Strips annotation blocks and stale instrumentation from a script so spans
/// are computed against the code alone.
#[derive(Debug, Clone)]
pub struct Cleaner {
    style: AnnotationStyle,
    legacy_prefixes: Vec<String>,
    artifact_patterns: Vec<Regex>,
}

impl Cleaner {
    pub fn new(style: AnnotationStyle) -> Self {
        Self {
            style,
            legacy_prefixes: Vec::new(),
            artifact_patterns: Vec::new(),
        }
    }

    /// Annotation prefixes from older tool generations; removed like the
    /// current one.
    pub fn with_legacy_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.legacy_prefixes = prefixes;
        self
    }

    /// Whole-line patterns for leftovers of older instrumentation.
    pub fn with_artifact_patterns(mut self, patterns: Vec<Regex>) -> Self {
        self.artifact_patterns = patterns;
        self
    }

    pub fn clean(&self, source: &str) -> Result<Cleaned, SyntaxError> {
        let lexed = lex(source)?;
        let mut src = SourceLines::parse(source);
        let mut single_line_code = vec![false; src.lines.len()];
        for ll in &lexed.logical {
            if ll.is_single_line() {
                single_line_code[ll.start] = true;
            }
        }

        let mut removed_annotations = 0usize;
        let mut removed_artifacts = 0usize;
        let mut kept: Vec<String> = Vec::with_capacity(src.lines.len());

        for (idx, line) in src.lines.iter().enumerate() {
            let kind = lexed.kinds.get(idx).copied().unwrap_or(LineKind::Blank);
            match kind {
                LineKind::Comment if self.is_annotation(line) => {
                    removed_annotations += 1;
                    continue;
                }
                LineKind::Comment if self.is_artifact(line) => {
                    removed_artifacts += 1;
                    continue;
                }
                LineKind::Code
                    if single_line_code[idx]
                        && (MARKER_STATEMENT.is_match(line) || self.is_artifact(line)) =>
                {
                    removed_artifacts += 1;
                    continue;
                }
                _ => {}
            }
            kept.push(line.clone());
        }

        src.lines = kept;
        Ok(Cleaned {
            source: src.join(),
            removed_annotations,
            removed_artifacts,
        })
    }

    fn is_annotation(&self, line: &str) -> bool {
        self.style.is_annotation_line(line)
            || self
                .legacy_prefixes
                .iter()
                .any(|p| has_annotation_prefix(line, p))
    }

    fn is_artifact(&self, line: &str) -> bool {
        self.artifact_patterns.iter().any(|re| re.is_match(line))
    }
}
