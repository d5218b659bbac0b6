use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, in source image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    /// True if both sides are at least `min_side` pixels.
    pub fn is_at_least(&self, min_side: u32) -> bool {
        let min = min_side as f32;
        self.width >= min && self.height >= min
    }
}

/// Face embedding vector. Serialized as a plain numeric array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Dimensions beyond the shorter vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One face found by a backend: where it is and what it looks like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A reference face for a known person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownFace {
    pub name: String,
    pub embedding: Embedding,
}

/// Result of matching a candidate embedding against the known faces.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// Euclidean distance to the nearest known face (`f32::INFINITY` if none).
    pub distance: f32,
    /// Name of the matched person (if any).
    pub name: Option<String>,
}

/// Strategy for comparing a candidate embedding against the known faces.
pub trait Matcher: Send + Sync {
    fn compare(&self, candidate: &Embedding, known: &[KnownFace], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher: the closest known face wins if it is within tolerance.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(&self, candidate: &Embedding, known: &[KnownFace], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in known.iter().enumerate() {
            let dist = candidate.euclidean_distance(&face.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                name: Some(known[idx].name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: best_dist,
                name: None,
            },
        }
    }
}
