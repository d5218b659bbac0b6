//! facesort-pipeline — Incremental photo filing by recognised person.
//!
//! Snapshots a date-partitioned input tree, recognizes faces only in dates
//! that changed since the last run, clusters unmatched faces, and mirrors
//! the results into a per-person output tree that never escapes its root.

pub mod cache;
pub mod cluster;
pub mod config;
pub mod dates;
pub mod error;
pub mod path_guard;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod recognizer;
pub mod reconcile;
pub mod scheduler;
pub mod snapshot;
pub mod state;
pub mod worker;

pub use cache::{CacheKey, DateCache, RecognitionCache};
pub use cluster::{cluster_unmatched, ClusterAssignment};
pub use config::{ConfigError, PipelineConfig, StrategyPreference};
pub use error::PipelineError;
pub use path_guard::{PathGuard, PathSafetyError};
pub use pipeline::{Pipeline, PlanPreview, RunReport};
pub use plan::IncrementalPlan;
pub use progress::{ProgressReporter, SilentReporter};
pub use recognizer::Recognizer;
pub use reconcile::OutputReconciler;
pub use scheduler::{ExecutionMode, Scheduler, SchedulerError, WorkerCommand};
pub use snapshot::Snapshot;
