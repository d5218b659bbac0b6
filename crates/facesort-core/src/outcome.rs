//! Per-file recognition outcome.
//!
//! Produced once per file per run, either freshly computed or read back
//! from the recognition cache, and never mutated afterwards.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};

/// What recognition concluded about one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionStatus {
    /// At least one face matched a known person. Names are sorted and unique.
    Success { matched: Vec<String> },
    /// Faces were found but none matched.
    NoMatch,
    NoFaceDetected,
    /// Detection failed or the image could not be read.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub status: RecognitionStatus,
    /// Number of faces detected (after the minimum face size filter).
    pub faces_detected: usize,
    /// Embeddings of detected faces that matched nobody.
    #[serde(default)]
    pub unmatched_embeddings: Vec<Embedding>,
}

impl RecognitionOutcome {
    pub fn success(mut matched: Vec<String>, faces_detected: usize, unmatched: Vec<Embedding>) -> Self {
        matched.sort();
        matched.dedup();
        Self {
            status: RecognitionStatus::Success { matched },
            faces_detected,
            unmatched_embeddings: unmatched,
        }
    }

    pub fn no_match(faces_detected: usize, unmatched: Vec<Embedding>) -> Self {
        Self {
            status: RecognitionStatus::NoMatch,
            faces_detected,
            unmatched_embeddings: unmatched,
        }
    }

    pub fn no_face() -> Self {
        Self {
            status: RecognitionStatus::NoFaceDetected,
            faces_detected: 0,
            unmatched_embeddings: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RecognitionStatus::Error { message: message.into() },
            faces_detected: 0,
            unmatched_embeddings: Vec::new(),
        }
    }

    /// Names of matched people; empty unless the status is `Success`.
    pub fn matched_identities(&self) -> &[String] {
        match &self.status {
            RecognitionStatus::Success { matched } => matched,
            RecognitionStatus::NoMatch
            | RecognitionStatus::NoFaceDetected
            | RecognitionStatus::Error { .. } => &[],
        }
    }

    /// Whether the file belongs in the unmatched bucket.
    pub fn is_unmatched(&self) -> bool {
        match &self.status {
            RecognitionStatus::Success { matched } => matched.is_empty(),
            RecognitionStatus::NoMatch
            | RecognitionStatus::NoFaceDetected
            | RecognitionStatus::Error { .. } => true,
        }
    }

    /// Embeddings eligible for clustering: only files that matched nobody.
    pub fn clusterable_embeddings(&self) -> &[Embedding] {
        match &self.status {
            RecognitionStatus::NoMatch => &self.unmatched_embeddings,
            RecognitionStatus::Success { .. }
            | RecognitionStatus::NoFaceDetected
            | RecognitionStatus::Error { .. } => &[],
        }
    }
}
