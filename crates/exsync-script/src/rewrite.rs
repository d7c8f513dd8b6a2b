use std::fmt;

use crate::format::AnnotationStyle;
use crate::text::{indent_columns, SourceLines};
use crate::types::{AnnotationBlock, StatementSpan};

/// Span/segment/annotation bookkeeping disagrees. Always a pipeline bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    UnknownSpan {
        span_index: usize,
        span_count: usize,
    },
    UnorderedBlocks {
        previous: usize,
        span_index: usize,
    },
    SpanOutOfRange {
        span_index: usize,
        end_line: usize,
        line_count: usize,
    },
    SegmentCount {
        segments: usize,
        markers: usize,
    },
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::UnknownSpan {
                span_index,
                span_count,
            } => write!(
                f,
                "annotation block references span {span_index} but only {span_count} spans exist"
            ),
            ConsistencyError::UnorderedBlocks {
                previous,
                span_index,
            } => write!(
                f,
                "annotation block for span {span_index} follows block for span {previous}"
            ),
            ConsistencyError::SpanOutOfRange {
                span_index,
                end_line,
                line_count,
            } => write!(
                f,
                "span {span_index} ends at line {} past end of script ({line_count} lines)",
                end_line + 1
            ),
            ConsistencyError::SegmentCount { segments, markers } => {
                write!(f, "{segments} output segments for {markers} markers")
            }
        }
    }
}

impl std::error::Error for ConsistencyError {}

/// Puts each annotation block right after its span.
///
/// Annotation lines already sitting directly below a span are removed first,
/// so the result never carries two blocks for one statement. Edits are applied
/// from the bottom up so line numbers of earlier spans stay valid.
pub fn rewrite_script(
    source: &str,
    spans: &[StatementSpan],
    blocks: &[AnnotationBlock],
    style: &AnnotationStyle,
) -> Result<String, ConsistencyError> {
    let mut src = SourceLines::parse(source);
    let mut by_span: Vec<Option<&AnnotationBlock>> = vec![None; spans.len()];
    let mut previous: Option<usize> = None;

    for block in blocks {
        if block.span_index >= spans.len() {
            return Err(ConsistencyError::UnknownSpan {
                span_index: block.span_index,
                span_count: spans.len(),
            });
        }
        if let Some(prev) = previous {
            if block.span_index <= prev {
                return Err(ConsistencyError::UnorderedBlocks {
                    previous: prev,
                    span_index: block.span_index,
                });
            }
        }
        previous = Some(block.span_index);
        by_span[block.span_index] = Some(block);
    }

    for (span_index, span) in spans.iter().enumerate() {
        if span.end_line >= src.lines.len() {
            return Err(ConsistencyError::SpanOutOfRange {
                span_index,
                end_line: span.end_line,
                line_count: src.lines.len(),
            });
        }
    }

    for (span_index, span) in spans.iter().enumerate().rev() {
        let mut after = span.end_line + 1;
        while after < src.lines.len() && is_body_comment(&src.lines[after], span, style) {
            after += 1;
        }
        let mut stale_end = after;
        while stale_end < src.lines.len() && style.is_annotation_line(&src.lines[stale_end]) {
            stale_end += 1;
        }
        let indent = " ".repeat(span.indent_level);
        let fresh: Vec<String> = by_span[span_index]
            .map(|b| b.lines.iter().map(|l| format!("{indent}{l}")).collect())
            .unwrap_or_default();
        src.lines.splice(after..stale_end, fresh);
    }

    if !src.trailing_newline && !blocks.is_empty() {
        src.trailing_newline = true;
    }
    Ok(src.join())
}

/// A comment indented past the span's own level closes out its body.
fn is_body_comment(line: &str, span: &StatementSpan, style: &AnnotationStyle) -> bool {
    line.trim_start().starts_with('#')
        && indent_columns(line) > span.indent_level
        && !style.is_annotation_line(line)
}
