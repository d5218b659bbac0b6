//! The run orchestrator.
//!
//! Stages run one after another on the calling thread: snapshot, plan,
//! cache lookup, recognition, clustering, reconciliation and finally the
//! snapshot checkpoint. Only the recognition stage is concurrent.

use crate::cache::{CacheKey, DateCache, RecognitionCache};
use crate::cluster;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::path_guard::{PathGuard, PathSafetyError};
use crate::plan::{self, IncrementalPlan};
use crate::progress::ProgressReporter;
use crate::reconcile::{OutputReconciler, Placement};
use crate::recognizer::Recognizer;
use crate::scheduler::{ExecutionMode, OutcomeSink, RecognitionJob, Scheduler, WorkerCommand};
use crate::snapshot::{self, Snapshot};
use crate::state::{StateDir, STATE_DIR_NAME};
use facesort_core::{FaceBackend, RecognitionOutcome, RecognitionStatus, ReferenceRegistry};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// `(date, relative path)` of one input file.
type FileId = (String, String);

/// Statistics of one completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub scanned_files: usize,
    pub changed_dates: BTreeSet<String>,
    pub deleted_dates: BTreeSet<String>,
    pub cache_hits: usize,
    pub recognized: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub no_face: usize,
    pub errors: usize,
    pub clusters: usize,
    pub files_written: usize,
    /// Date subtrees and cache files removed.
    pub artifacts_removed: usize,
    /// `None` when nothing needed recognition.
    pub mode: Option<ExecutionMode>,
    pub fallback_used: bool,
}

impl RunReport {
    pub fn is_noop(&self) -> bool {
        self.changed_dates.is_empty() && self.deleted_dates.is_empty()
    }
}

/// What a run would do, computed without touching the output tree.
#[derive(Debug, Clone)]
pub struct PlanPreview {
    pub plan: IncrementalPlan,
    pub cache_hits: usize,
    pub to_recognize: usize,
}

/// Cache state and work list for the changed dates.
struct Prepared {
    caches: BTreeMap<String, DateCache>,
    outcomes: BTreeMap<FileId, RecognitionOutcome>,
    jobs: Vec<RecognitionJob>,
    cache_hits: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    recognizer: Recognizer,
    scheduler: Scheduler,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        backend: Arc<dyn FaceBackend>,
        registry: &dyn ReferenceRegistry,
    ) -> Self {
        let recognizer = Recognizer::new(backend, registry, &config.recognition);
        let scheduler = Scheduler::new(config.parallel.clone(), None);
        Self {
            config,
            recognizer,
            scheduler,
        }
    }

    /// Enable the process pool strategy; children are started with `command`.
    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.scheduler = Scheduler::new(self.config.parallel.clone(), Some(command));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }

    /// Diff the input against the last persisted snapshot and count cache
    /// hits, without writing anything.
    pub fn plan(&self, input_root: &Path, output_root: &Path) -> Result<PlanPreview, PipelineError> {
        let scan = snapshot::scan_input(input_root)?;
        let state = StateDir::new(output_root);
        let previous = snapshot::load(&state);
        let current = scan
            .snapshot
            .with_params_fingerprint(&self.recognizer.params_fingerprint());
        let plan = plan::diff(previous.as_ref(), current);

        let prepared = self.prepare(&plan, &scan.locations, &RecognitionCache::new(state));
        Ok(PlanPreview {
            cache_hits: prepared.cache_hits,
            to_recognize: prepared.jobs.len(),
            plan,
        })
    }

    /// Bring `output_root` in line with `input_root`.
    pub fn run(
        &self,
        input_root: &Path,
        output_root: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport, PipelineError> {
        fs::create_dir_all(output_root).map_err(|source| PipelineError::OutputRoot {
            path: output_root.display().to_string(),
            source,
        })?;
        let guard = PathGuard::new(output_root)?;
        let state = StateDir::new(guard.root());

        let scan = snapshot::scan_input(input_root)?;
        progress.on_snapshot_complete(scan.snapshot.dates.len(), scan.snapshot.file_count());

        let previous = snapshot::load(&state);
        let fingerprint = self.recognizer.params_fingerprint();
        if previous.as_ref().is_some_and(|p| p.params_fingerprint != fingerprint) {
            tracing::info!("recognition parameters changed; every date will be reprocessed");
        }
        let plan = plan::diff(previous.as_ref(), scan.snapshot.with_params_fingerprint(&fingerprint));
        progress.on_plan(plan.changed_dates.len(), plan.deleted_dates.len());

        let mut report = RunReport {
            scanned_files: plan.snapshot.file_count(),
            changed_dates: plan.changed_dates.clone(),
            deleted_dates: plan.deleted_dates.clone(),
            ..RunReport::default()
        };
        if plan.is_noop() {
            tracing::info!(files = report.scanned_files, "output already up to date");
            return Ok(report);
        }
        tracing::info!(
            changed = plan.changed_dates.len(),
            deleted = plan.deleted_dates.len(),
            files = plan.changed_file_count(),
            "incremental plan"
        );

        // Recognition
        let cache_store = RecognitionCache::new(state.clone());
        let Prepared {
            mut caches,
            mut outcomes,
            jobs,
            cache_hits,
        } = self.prepare(&plan, &scan.locations, &cache_store);
        report.cache_hits = cache_hits;
        progress.on_recognize_start(jobs.len(), cache_hits);

        if !jobs.is_empty() {
            let mut sink = CacheSink {
                store: &cache_store,
                caches: &mut caches,
                outcomes: &mut outcomes,
                dirty: BTreeSet::new(),
            };
            let schedule = self.scheduler.run(&self.recognizer, &jobs, &mut sink, progress);
            report.recognized = schedule.recognized;
            report.mode = Some(schedule.mode);
            report.fallback_used = schedule.fallback_used;
        }
        progress.on_recognize_complete(report.recognized);

        // Pruned or reset caches are written even when nothing was recognized.
        for cache in caches.values() {
            save_cache(&cache_store, cache);
        }
        tally(&mut report, &outcomes);

        // Clustering
        let mut cluster_labels: BTreeMap<FileId, Vec<String>> = BTreeMap::new();
        if self.config.clustering.enabled {
            let unmatched = outcomes.iter().flat_map(|(id, outcome)| {
                outcome
                    .clusterable_embeddings()
                    .iter()
                    .map(move |embedding| (id.clone(), embedding.clone()))
            });
            let assignment =
                cluster::cluster_unmatched(unmatched, &self.config.clustering, &self.config.output.cluster_prefix);
            report.clusters = assignment.len();
            for (label, members) in assignment {
                for id in members {
                    cluster_labels.entry(id).or_default().push(label.clone());
                }
            }
            tracing::info!(clusters = report.clusters, "unmatched faces clustered");
        }

        // Reconciliation
        let reconciler = OutputReconciler::new(guard, &self.config.output.unmatched_bucket);
        report.artifacts_removed = reconciler.remove_dates(&plan.affected_dates())?;
        for date in &plan.deleted_dates {
            match cache_store.remove(date) {
                Ok(true) => report.artifacts_removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(date = %date, error = %e, "could not remove cache file"),
            }
        }

        let placements = self.placements(&outcomes, &cluster_labels, &scan.locations)?;
        progress.on_filing_start(placements.len());
        let written = reconciler.file_all(&placements)?;
        report.files_written = written.len();
        progress.on_filing_complete(written.len());

        persist_snapshot(&state, &plan.snapshot)?;
        tracing::info!(
            written = report.files_written,
            removed = report.artifacts_removed,
            recognized = report.recognized,
            cache_hits = report.cache_hits,
            "run complete"
        );
        Ok(report)
    }

    /// Load and normalize caches for the changed dates and split their
    /// files into cache hits and recognition jobs.
    fn prepare(
        &self,
        plan: &IncrementalPlan,
        locations: &BTreeMap<String, BTreeMap<String, PathBuf>>,
        cache_store: &RecognitionCache,
    ) -> Prepared {
        let fingerprint = self.recognizer.params_fingerprint();
        let mut prepared = Prepared {
            caches: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            jobs: Vec::new(),
            cache_hits: 0,
        };

        for date in &plan.changed_dates {
            let Some(bucket) = plan.snapshot.dates.get(date) else {
                continue;
            };
            let mut cache = cache_store.load(date).normalize(&fingerprint);
            let live: BTreeSet<String> = bucket.files.iter().map(|f| f.path.clone()).collect();
            let pruned = cache.prune(&live);

            let mut hits = 0;
            for file in &bucket.files {
                let key = CacheKey {
                    date: date.clone(),
                    relative_path: file.path.clone(),
                    size: file.size,
                    mtime: file.mtime,
                };
                if let Some(outcome) = cache.lookup(&key) {
                    prepared.outcomes.insert((date.clone(), file.path.clone()), outcome.clone());
                    hits += 1;
                    continue;
                }
                let Some(source) = locations.get(date).and_then(|files| files.get(&file.path)) else {
                    tracing::warn!(date = %date, path = %file.path, "no source location for file");
                    continue;
                };
                prepared.jobs.push(RecognitionJob {
                    key,
                    source: source.clone(),
                });
            }

            tracing::debug!(date = %date, files = bucket.files.len(), hits, pruned, "cache consulted");
            prepared.cache_hits += hits;
            prepared.caches.insert(date.clone(), cache);
        }
        prepared
    }

    /// One placement per destination folder of every outcome, in
    /// `(date, path)` order so collision suffixes are stable.
    fn placements(
        &self,
        outcomes: &BTreeMap<FileId, RecognitionOutcome>,
        cluster_labels: &BTreeMap<FileId, Vec<String>>,
        locations: &BTreeMap<String, BTreeMap<String, PathBuf>>,
    ) -> Result<Vec<Placement>, PipelineError> {
        let bucket = &self.config.output.unmatched_bucket;
        let mut placements = Vec::new();

        for (id, outcome) in outcomes {
            let (date, relative_path) = id;
            let Some(source) = locations.get(date).and_then(|files| files.get(relative_path)) else {
                continue;
            };
            let file_name = output_file_name(relative_path);

            let folders: Vec<Vec<String>> = match (outcome.matched_identities(), cluster_labels.get(id)) {
                (names, _) if !names.is_empty() => names
                    .iter()
                    .map(|name| {
                        if name == STATE_DIR_NAME {
                            return Err(PathSafetyError::InvalidSegment(name.clone()));
                        }
                        Ok(vec![name.clone(), date.clone()])
                    })
                    .collect::<Result<Vec<_>, PathSafetyError>>()?,
                (_, Some(labels)) => labels
                    .iter()
                    .map(|label| vec![bucket.clone(), label.clone(), date.clone()])
                    .collect(),
                (_, None) => vec![vec![bucket.clone(), date.clone()]],
            };

            placements.extend(folders.into_iter().map(|dir_segments| Placement {
                source: source.clone(),
                dir_segments,
                file_name: file_name.clone(),
            }));
        }
        Ok(placements)
    }
}

/// Stores each outcome into its date's cache and persists dirty caches
/// after every batch.
struct CacheSink<'a> {
    store: &'a RecognitionCache,
    caches: &'a mut BTreeMap<String, DateCache>,
    outcomes: &'a mut BTreeMap<FileId, RecognitionOutcome>,
    dirty: BTreeSet<String>,
}

impl OutcomeSink for CacheSink<'_> {
    fn accept(&mut self, job: &RecognitionJob, outcome: RecognitionOutcome) {
        let key = &job.key;
        if let Some(cache) = self.caches.get_mut(&key.date) {
            cache.store(key, outcome.clone());
            self.dirty.insert(key.date.clone());
        }
        self.outcomes
            .insert((key.date.clone(), key.relative_path.clone()), outcome);
    }

    fn batch_complete(&mut self) {
        for date in std::mem::take(&mut self.dirty) {
            if let Some(cache) = self.caches.get(&date) {
                save_cache(self.store, cache);
            }
        }
    }
}

fn save_cache(store: &RecognitionCache, cache: &DateCache) {
    if let Err(e) = store.save_atomic(cache) {
        tracing::warn!(date = %cache.date, error = %e, "could not save recognition cache");
    }
}

fn persist_snapshot(state: &StateDir, snapshot: &Snapshot) -> Result<(), PipelineError> {
    snapshot::save(state, snapshot).map_err(|source| PipelineError::State {
        path: state.snapshot_path().display().to_string(),
        source,
    })
}

fn tally(report: &mut RunReport, outcomes: &BTreeMap<FileId, RecognitionOutcome>) {
    for outcome in outcomes.values() {
        match outcome.status {
            RecognitionStatus::Success { .. } => report.matched += 1,
            RecognitionStatus::NoMatch => report.unmatched += 1,
            RecognitionStatus::NoFaceDetected => report.no_face += 1,
            RecognitionStatus::Error { .. } => report.errors += 1,
        }
    }
}

/// Flatten a date-relative path into one file name: `sub/a.jpg` -> `sub_a.jpg`.
fn output_file_name(relative_path: &str) -> String {
    relative_path.replace(['/', '\\'], "_")
}
