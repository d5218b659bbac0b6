//! Turns one image into a `RecognitionOutcome`.
//!
//! Never fails: unreadable images and backend errors become `Error` outcomes.

use crate::cache;
use crate::config::RecognitionSettings;
use facesort_core::{
    FaceBackend, KnownFace, Matcher, NearestMatcher, RecognitionOutcome, ReferenceRegistry,
};
use std::path::Path;
use std::sync::Arc;

pub struct Recognizer {
    backend: Arc<dyn FaceBackend>,
    known: Vec<KnownFace>,
    reference_fingerprint: String,
    tolerance: f32,
    min_face_size: u32,
}

impl Recognizer {
    pub fn new(
        backend: Arc<dyn FaceBackend>,
        registry: &dyn ReferenceRegistry,
        settings: &RecognitionSettings,
    ) -> Self {
        Self {
            backend,
            known: registry.known_faces(),
            reference_fingerprint: registry.fingerprint(),
            tolerance: settings.tolerance,
            min_face_size: settings.min_face_size,
        }
    }

    /// Fingerprint of everything that can change an outcome.
    pub fn params_fingerprint(&self) -> String {
        cache::params_fingerprint(
            &self.backend.id(),
            self.tolerance,
            self.min_face_size,
            &self.reference_fingerprint,
        )
    }

    pub fn recognize(&self, image: &Path) -> RecognitionOutcome {
        if let Err(e) = image::image_dimensions(image) {
            tracing::debug!(image = %image.display(), error = %e, "unreadable image");
            return RecognitionOutcome::error(format!("unreadable image: {e}"));
        }

        let detections = match self.backend.detect_and_encode(image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(image = %image.display(), error = %e, "detection failed");
                return RecognitionOutcome::error(e.to_string());
            }
        };

        let faces: Vec<_> = detections
            .into_iter()
            .filter(|face| face.bbox.is_at_least(self.min_face_size))
            .collect();
        if faces.is_empty() {
            return RecognitionOutcome::no_face();
        }

        let matcher = NearestMatcher;
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        for face in &faces {
            let result = matcher.compare(&face.embedding, &self.known, self.tolerance);
            match result.name {
                Some(name) if result.matched => matched.push(name),
                _ => unmatched.push(face.embedding.clone()),
            }
        }

        if matched.is_empty() {
            RecognitionOutcome::no_match(faces.len(), unmatched)
        } else {
            RecognitionOutcome::success(matched, faces.len(), unmatched)
        }
    }
}
