//! facesort-core — Face types and the capabilities the pipeline consumes.
//!
//! Detection/embedding and the reference registry are external
//! collaborators; this crate defines their traits, the shared value types,
//! and the nearest-reference matcher used to turn embeddings into names.

pub mod backend;
pub mod outcome;
pub mod registry;
pub mod types;

pub use backend::{BackendError, CommandBackend, FaceBackend};
pub use outcome::{RecognitionOutcome, RecognitionStatus};
pub use registry::{JsonRegistry, ReferenceRegistry, RegistryError};
pub use types::{BoundingBox, Embedding, FaceDetection, KnownFace, MatchResult, Matcher, NearestMatcher};
