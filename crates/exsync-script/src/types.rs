use serde::Serialize;

/// A maximal top-level statement, including its nested indented body.
///
/// Lines are 0-based physical line indices into the source the span was computed
/// from; `end_line` is inclusive and is the last code line of the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatementSpan {
    pub start_line: usize,
    pub end_line: usize,
    pub indent_level: usize,
}

impl StatementSpan {
    pub fn contains(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// Output printed between marker `span_index - 1` and marker `span_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSegment {
    pub span_index: usize,
    pub raw_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotationBlock {
    pub span_index: usize,
    pub lines: Vec<String>,
}
