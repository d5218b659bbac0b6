use crate::config::ConfigError;
use crate::path_guard::PathSafetyError;
use thiserror::Error;

/// Fatal pipeline failures. Everything recoverable (per-file, per-batch,
/// per-cache-file) is absorbed into outcomes and run statistics instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input root {path} unreadable: {source}")]
    InputRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("output root {path} not writable: {source}")]
    OutputRoot {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsafe output path: {0}")]
    PathSafety(#[from] PathSafetyError),
    #[error("filing {source_path} to {destination} failed: {error}")]
    Filing {
        source_path: String,
        destination: String,
        #[source]
        error: std::io::Error,
    },
    #[error("persisting state to {path} failed: {source}")]
    State {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
