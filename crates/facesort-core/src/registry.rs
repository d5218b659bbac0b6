//! Reference registry: the known people and their reference embeddings.

use crate::types::KnownFace;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("reference file not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reference file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Source of known faces.
pub trait ReferenceRegistry: Send + Sync {
    /// Deterministic fingerprint of the active reference set. Changes whenever
    /// a reference is added, removed or altered.
    fn fingerprint(&self) -> String;

    fn known_faces(&self) -> Vec<KnownFace>;
}

/// Reference set loaded from a JSON array of `{"name": .., "embedding": [..]}`.
#[derive(Debug, Clone, Default)]
pub struct JsonRegistry {
    faces: Vec<KnownFace>,
}

impl JsonRegistry {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            return Err(RegistryError::NotFound(path.display().to_string()));
        }
        let data = std::fs::read(path)?;
        let faces: Vec<KnownFace> = serde_json::from_slice(&data)?;
        tracing::info!(path = %path.display(), references = faces.len(), "loaded reference set");
        Ok(Self { faces })
    }

    pub fn from_faces(faces: Vec<KnownFace>) -> Self {
        Self { faces }
    }
}

impl ReferenceRegistry for JsonRegistry {
    fn fingerprint(&self) -> String {
        fingerprint_faces(&self.faces)
    }

    fn known_faces(&self) -> Vec<KnownFace> {
        self.faces.clone()
    }
}

/// SHA-256 over the sorted `(name, embedding)` list, independent of input order.
pub fn fingerprint_faces(faces: &[KnownFace]) -> String {
    let mut encoded: Vec<Vec<u8>> = faces
        .iter()
        .map(|face| {
            let mut buf = Vec::with_capacity(face.name.len() + 1 + face.embedding.values.len() * 4);
            buf.extend_from_slice(face.name.as_bytes());
            buf.push(0);
            for v in &face.embedding.values {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            buf
        })
        .collect();
    encoded.sort();

    let mut hasher = Sha256::new();
    hasher.update((encoded.len() as u64).to_le_bytes());
    for entry in &encoded {
        hasher.update((entry.len() as u64).to_le_bytes());
        hasher.update(entry);
    }
    format!("{:x}", hasher.finalize())
}
