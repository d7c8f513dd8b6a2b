use exsync_contracts::{hex_lower, sentinel, SENTINEL_NONCE_HEX_LEN};
use sha2::{Digest, Sha256};

use crate::types::OutputSegment;

/// State for one pass of the pipeline over one script.
///
/// Owns the marker counter and the segments recovered from the captured output,
/// so concurrent runs over different scripts never share anything.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    nonce: String,
    first_marker: u32,
    next_marker: u32,
    segments: Vec<OutputSegment>,
}

impl PipelineRun {
    /// The sentinel nonce is derived from the cleaned source, so re-running the
    /// same script produces the same instrumented text.
    pub fn new(clean_source: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(clean_source.as_bytes());
        let mut nonce = hex_lower(&hasher.finalize());
        nonce.truncate(SENTINEL_NONCE_HEX_LEN);
        Self::with_nonce(nonce, 1)
    }

    pub fn with_nonce(nonce: impl Into<String>, first_marker: u32) -> Self {
        Self {
            nonce: nonce.into(),
            first_marker,
            next_marker: first_marker,
            segments: Vec::new(),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Allocates the next marker id.
    pub fn next_marker(&mut self) -> u32 {
        let id = self.next_marker;
        self.next_marker += 1;
        id
    }

    pub fn markers_issued(&self) -> usize {
        (self.next_marker - self.first_marker) as usize
    }

    pub fn sentinel(&self, id: u32) -> String {
        sentinel(&self.nonce, id)
    }

    pub fn push_segment(&mut self, segment: OutputSegment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[OutputSegment] {
        &self.segments
    }
}
