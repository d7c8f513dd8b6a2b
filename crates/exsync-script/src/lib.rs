//! Pure text stages of the output synchronization pipeline.
//!
//! Source text flows through [`clean`], [`split`], [`inject`], then (after the
//! host runner executed the instrumented script) [`segment`], [`format`] and
//! [`rewrite`]. None of these modules touch the filesystem or spawn processes.

pub mod clean;
pub mod format;
pub mod inject;
pub mod lex;
pub mod listing;
pub mod rewrite;
pub mod run;
pub mod segment;
pub mod split;
pub mod text;
pub mod types;

pub use clean::{Cleaned, Cleaner};
pub use format::{format_segment, format_segments, wrap_line, AnnotationStyle, Profile};
pub use inject::{inject_markers, Instrumented, LineMap};
pub use rewrite::{rewrite_script, ConsistencyError};
pub use run::PipelineRun;
pub use segment::{segment_output, SegmentError};
pub use split::{split_statements, SyntaxError};
pub use types::{AnnotationBlock, OutputSegment, StatementSpan};
