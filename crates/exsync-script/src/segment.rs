use std::fmt;

use crate::run::PipelineRun;
use crate::text::normalize_newlines;
use crate::types::OutputSegment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Marker `index` (0-based, in span order) never showed up after the
    /// previous one: the script stopped early or printed out of order.
    MissingMarker { index: usize, sentinel: String },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::MissingMarker { index, sentinel } => write!(
                f,
                "marker #{} ({sentinel}) missing from captured output",
                index + 1
            ),
        }
    }
}

impl std::error::Error for SegmentError {}

/// Cuts `captured` at every sentinel, in order, and records one segment per
/// sentinel in `run`. Each sentinel and the newline right after it are dropped;
/// anything printed after the last sentinel is ignored.
pub fn segment_output(
    run: &mut PipelineRun,
    captured: &str,
    sentinels: &[String],
) -> Result<usize, SegmentError> {
    let text = normalize_newlines(captured);
    let mut pos = 0usize;
    let mut found: Vec<OutputSegment> = Vec::with_capacity(sentinels.len());

    for (index, sentinel) in sentinels.iter().enumerate() {
        let Some(rel) = text[pos..].find(sentinel.as_str()) else {
            return Err(SegmentError::MissingMarker {
                index,
                sentinel: sentinel.clone(),
            });
        };
        found.push(OutputSegment {
            span_index: index,
            raw_text: text[pos..pos + rel].to_string(),
        });
        pos += rel + sentinel.len();
        if text[pos..].starts_with('\n') {
            pos += 1;
        }
    }

    let count = found.len();
    for segment in found {
        run.push_segment(segment);
    }
    Ok(count)
}
