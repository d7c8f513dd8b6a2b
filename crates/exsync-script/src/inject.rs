use crate::run::PipelineRun;
use crate::text::SourceLines;
use crate::types::StatementSpan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrumented {
    pub source: String,
    /// Sentinels in emission order; `sentinels[k]` follows `spans[k]`.
    pub sentinels: Vec<String>,
    pub line_map: LineMap,
}

/// Maps instrumented line numbers back to the script they were derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMap {
    origin: Vec<Option<usize>>,
}

impl LineMap {
    /// 1-based in, 1-based out. Marker lines map to `None`.
    pub fn original_line(&self, instrumented_line: usize) -> Option<usize> {
        let idx = instrumented_line.checked_sub(1)?;
        self.origin.get(idx).copied().flatten().map(|l| l + 1)
    }

    pub fn len(&self) -> usize {
        self.origin.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origin.is_empty()
    }
}

/// Emits one marker statement after every span, at the span's own indentation.
pub fn inject_markers(source: &str, spans: &[StatementSpan], run: &mut PipelineRun) -> Instrumented {
    let src = SourceLines::parse(source);
    let mut lines: Vec<String> = Vec::with_capacity(src.lines.len() + spans.len());
    let mut origin: Vec<Option<usize>> = Vec::with_capacity(src.lines.len() + spans.len());
    let mut sentinels: Vec<String> = Vec::with_capacity(spans.len());
    let mut spans_iter = spans.iter().peekable();

    for (idx, line) in src.lines.iter().enumerate() {
        lines.push(line.clone());
        origin.push(Some(idx));
        while let Some(span) = spans_iter.next_if(|s| s.end_line == idx) {
            let id = run.next_marker();
            let sentinel = run.sentinel(id);
            lines.push(marker_statement(span.indent_level, &sentinel));
            origin.push(None);
            sentinels.push(sentinel);
        }
    }

    let out = SourceLines {
        lines,
        eol: src.eol,
        trailing_newline: true,
    };
    Instrumented {
        source: out.join(),
        sentinels,
        line_map: LineMap { origin },
    }
}

/// Goes through `builtins` so scripts that rebind `print` still emit markers.
fn marker_statement(indent: usize, sentinel: &str) -> String {
    format!(
        "{}__import__('builtins').print('{sentinel}', flush=True)",
        " ".repeat(indent)
    )
}
