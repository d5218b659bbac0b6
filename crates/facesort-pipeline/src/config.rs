use crate::path_guard;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Pipeline configuration, loaded from an optional TOML file and then
/// overridden by `FACESORT_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub recognition: RecognitionSettings,
    pub parallel: ParallelSettings,
    pub clustering: ClusterSettings,
    pub output: OutputSettings,
    pub backend: BackendSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Maximum Euclidean distance for a positive identity match.
    pub tolerance: f32,
    /// Faces with a narrower or shorter bounding box are ignored.
    pub min_face_size: u32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            min_face_size: 20,
        }
    }
}

/// Which concurrent strategy the scheduler may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Process pool when a worker command is available on a forking-friendly
    /// platform, thread pool otherwise.
    Auto,
    Threads,
    Processes,
}

impl FromStr for StrategyPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "threads" | "thread" => Ok(Self::Threads),
            "processes" | "process" => Ok(Self::Processes),
            other => Err(ConfigError::Invalid {
                field: "parallel.strategy",
                reason: format!("unknown strategy {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub enabled: bool,
    /// Requested pool size, capped at the host's available parallelism.
    pub workers: usize,
    /// Below this many files to recognize, run serially.
    pub min_files: usize,
    /// Files submitted per batch.
    pub batch_size: usize,
    pub strategy: StrategyPreference,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 4,
            min_files: 8,
            batch_size: 4,
            strategy: StrategyPreference::Auto,
        }
    }
}

impl ParallelSettings {
    pub fn effective_workers(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.workers.clamp(1, available)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub enabled: bool,
    /// Maximum mean distance for joining an existing cluster.
    /// Normally stricter than the identity tolerance.
    pub threshold: f32,
    /// Clusters with fewer faces are dropped.
    pub min_size: usize,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.45,
            min_size: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Top-level folder for no-match, no-face and error outcomes.
    pub unmatched_bucket: String,
    /// Cluster folders are named `<prefix>_<n>` inside the unmatched bucket.
    pub cluster_prefix: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            unmatched_bucket: "Unmatched".to_string(),
            cluster_prefix: "UnknownPerson".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// External detector program for the command backend.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    /// JSON file with reference embeddings.
    pub references: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from `path` (if given), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FACESORT_*` overrides from `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string());

        self.recognition.tolerance = env_or(&parsed, "FACESORT_TOLERANCE", self.recognition.tolerance);
        self.recognition.min_face_size =
            env_or(&parsed, "FACESORT_MIN_FACE_SIZE", self.recognition.min_face_size);
        self.parallel.workers = env_or(&parsed, "FACESORT_WORKERS", self.parallel.workers);
        self.parallel.batch_size = env_or(&parsed, "FACESORT_BATCH_SIZE", self.parallel.batch_size);
        self.clustering.threshold =
            env_or(&parsed, "FACESORT_CLUSTER_THRESHOLD", self.clustering.threshold);
        if let Some(v) = parsed("FACESORT_PARALLEL") {
            self.parallel.enabled = v != "0";
        }
        if let Some(v) = parsed("FACESORT_STRATEGY") {
            self.parallel.strategy = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let tolerance = self.recognition.tolerance;
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "recognition.tolerance",
                reason: format!("must be a positive number, got {tolerance}"),
            });
        }
        let threshold = self.clustering.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "clustering.threshold",
                reason: format!("must be a positive number, got {threshold}"),
            });
        }
        if self.parallel.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "parallel.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, name) in [
            ("output.unmatched_bucket", &self.output.unmatched_bucket),
            ("output.cluster_prefix", &self.output.cluster_prefix),
        ] {
            path_guard::validate_segment(name).map_err(|e| ConfigError::Invalid {
                field,
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Parse an override, keeping `default` when unset or unparsable.
fn env_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable override");
            default
        }),
        None => default,
    }
}
