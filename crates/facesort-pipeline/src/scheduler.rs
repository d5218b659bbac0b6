//! Recognition scheduling.
//!
//! Decide serial vs. concurrent execution, pick a concurrent strategy,
//! submit work in small batches, and fall back to serial execution for
//! everything still pending if a batch fails as a whole. Per-file failures
//! never abort a batch; they are `Error` outcomes.
//!
//! Workers only compute. Every outcome is handed to the caller's
//! `OutcomeSink` on this thread, so cache mutation needs no locking.

use crate::cache::CacheKey;
use crate::config::{ParallelSettings, StrategyPreference};
use crate::progress::ProgressReporter;
use crate::recognizer::Recognizer;
use crate::worker::{WorkerHello, WorkerRequest, WorkerResponse};
use facesort_core::RecognitionOutcome;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use std::io::{self, BufRead, BufReader, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("thread pool setup failed: {0}")]
    ThreadPool(String),
    #[error("no worker command configured for the process pool")]
    NoWorkerCommand,
    #[error("worker process spawn failed: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker process failed: {0}")]
    Worker(String),
}

/// One file to recognize.
#[derive(Debug, Clone)]
pub struct RecognitionJob {
    pub key: CacheKey,
    pub source: PathBuf,
}

/// How the worker processes are started: `<program> <args...>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Serial,
    Threads { workers: usize },
    Processes { workers: usize },
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Serial => write!(f, "serial"),
            ExecutionMode::Threads { workers } => write!(f, "threads x{workers}"),
            ExecutionMode::Processes { workers } => write!(f, "processes x{workers}"),
        }
    }
}

/// Receives outcomes as they complete.
pub trait OutcomeSink {
    fn accept(&mut self, job: &RecognitionJob, outcome: RecognitionOutcome);

    /// Called after each batch has been fully accepted.
    fn batch_complete(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleReport {
    pub mode: ExecutionMode,
    pub recognized: usize,
    pub fallback_used: bool,
}

/// Runs one batch concurrently. Returns `(index into batch, outcome)` pairs.
trait BatchExecutor {
    fn run_batch(
        &mut self,
        recognizer: &Recognizer,
        batch: &[RecognitionJob],
    ) -> Result<Vec<(usize, RecognitionOutcome)>, SchedulerError>;
}

pub struct Scheduler {
    settings: ParallelSettings,
    worker_command: Option<WorkerCommand>,
}

impl Scheduler {
    pub fn new(settings: ParallelSettings, worker_command: Option<WorkerCommand>) -> Self {
        Self {
            settings,
            worker_command,
        }
    }

    /// Serial when disabled, below the volume threshold, or with one worker.
    pub fn decide(&self, file_count: usize) -> ExecutionMode {
        let workers = self.settings.effective_workers();
        if !self.settings.enabled || file_count < self.settings.min_files.max(2) || workers <= 1 {
            return ExecutionMode::Serial;
        }

        let workers = workers.min(file_count);
        match self.settings.strategy {
            StrategyPreference::Threads => ExecutionMode::Threads { workers },
            StrategyPreference::Processes if self.worker_command.is_some() => {
                ExecutionMode::Processes { workers }
            }
            StrategyPreference::Processes => {
                tracing::warn!("process pool requested without a worker command; using threads");
                ExecutionMode::Threads { workers }
            }
            StrategyPreference::Auto if cfg!(unix) && self.worker_command.is_some() => {
                ExecutionMode::Processes { workers }
            }
            StrategyPreference::Auto => ExecutionMode::Threads { workers },
        }
    }

    pub fn run(
        &self,
        recognizer: &Recognizer,
        jobs: &[RecognitionJob],
        sink: &mut dyn OutcomeSink,
        progress: &dyn ProgressReporter,
    ) -> ScheduleReport {
        let mode = self.decide(jobs.len());
        let batch_size = self.settings.batch_size.max(1);
        tracing::info!(files = jobs.len(), %mode, batch_size, "recognition scheduled");

        let executor: Result<Box<dyn BatchExecutor>, SchedulerError> = match mode {
            ExecutionMode::Serial => {
                let recognized = run_serial(recognizer, jobs, 0, jobs.len(), batch_size, sink, progress);
                return ScheduleReport { mode, recognized, fallback_used: false };
            }
            ExecutionMode::Threads { workers } => {
                ThreadPoolExecutor::new(workers).map(|e| Box::new(e) as Box<dyn BatchExecutor>)
            }
            ExecutionMode::Processes { workers } => self
                .worker_command
                .clone()
                .ok_or(SchedulerError::NoWorkerCommand)
                .map(|command| {
                    let pool = ProcessPoolExecutor::new(command, workers, recognizer.params_fingerprint());
                    Box::new(pool) as Box<dyn BatchExecutor>
                }),
        };

        let mut executor = match executor {
            Ok(executor) => executor,
            Err(e) => {
                tracing::warn!(error = %e, %mode, "concurrent setup failed; recognizing serially");
                let recognized = run_serial(recognizer, jobs, 0, jobs.len(), batch_size, sink, progress);
                return ScheduleReport { mode, recognized, fallback_used: true };
            }
        };

        let mut done = 0;
        for batch in jobs.chunks(batch_size) {
            match executor.run_batch(recognizer, batch) {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        sink.accept(&batch[index], outcome);
                    }
                    done += batch.len();
                    sink.batch_complete();
                    progress.on_recognize_progress(done, jobs.len());
                    tracing::debug!(done, total = jobs.len(), "batch complete");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        %mode,
                        remaining = jobs.len() - done,
                        "batch failed; recognizing the remaining files serially"
                    );
                    let recognized =
                        run_serial(recognizer, &jobs[done..], done, jobs.len(), batch_size, sink, progress);
                    return ScheduleReport {
                        mode,
                        recognized: done + recognized,
                        fallback_used: true,
                    };
                }
            }
        }

        ScheduleReport { mode, recognized: done, fallback_used: false }
    }
}

/// Recognize in order on the calling thread.
fn run_serial(
    recognizer: &Recognizer,
    jobs: &[RecognitionJob],
    already_done: usize,
    total: usize,
    batch_size: usize,
    sink: &mut dyn OutcomeSink,
    progress: &dyn ProgressReporter,
) -> usize {
    for (i, job) in jobs.iter().enumerate() {
        sink.accept(job, recognize_guarded(recognizer, &job.source));
        let done = i + 1;
        if done % batch_size == 0 || done == jobs.len() {
            sink.batch_complete();
        }
        progress.on_recognize_progress(already_done + done, total);
    }
    jobs.len()
}

/// Recognize one file, converting a panic into an `Error` outcome.
pub fn recognize_guarded(recognizer: &Recognizer, path: &Path) -> RecognitionOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| recognizer.recognize(path))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(image = %path.display(), %message, "recognition panicked");
            RecognitionOutcome::error(format!("recognition panicked: {message}"))
        }
    }
}

struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
}

impl ThreadPoolExecutor {
    fn new(workers: usize) -> Result<Self, SchedulerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("facesort-worker-{i}"))
            .build()
            .map_err(|e| SchedulerError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }
}

impl BatchExecutor for ThreadPoolExecutor {
    fn run_batch(
        &mut self,
        recognizer: &Recognizer,
        batch: &[RecognitionJob],
    ) -> Result<Vec<(usize, RecognitionOutcome)>, SchedulerError> {
        Ok(self.pool.install(|| {
            batch
                .par_iter()
                .enumerate()
                .map(|(i, job)| (i, recognize_guarded(recognizer, &job.source)))
                .collect()
        }))
    }
}

/// Up to `workers` long-lived worker processes, started on the first batch
/// and reused until the run ends. Each batch is split across them; every
/// worker handles its share one request at a time.
struct ProcessPoolExecutor {
    command: WorkerCommand,
    workers: usize,
    /// Workers must recognize with exactly these parameters.
    params_fingerprint: String,
    processes: Vec<WorkerProcess>,
}

impl ProcessPoolExecutor {
    fn new(command: WorkerCommand, workers: usize, params_fingerprint: String) -> Self {
        Self {
            command,
            workers: workers.max(1),
            params_fingerprint,
            processes: Vec::new(),
        }
    }

    fn ensure_started(&mut self, wanted: usize) -> Result<(), SchedulerError> {
        while self.processes.len() < wanted.min(self.workers) {
            let process = WorkerProcess::spawn(&self.command, &self.params_fingerprint)?;
            tracing::debug!(worker = self.processes.len(), pid = process.child.id(), "worker process started");
            self.processes.push(process);
        }
        Ok(())
    }
}

impl BatchExecutor for ProcessPoolExecutor {
    fn run_batch(
        &mut self,
        _recognizer: &Recognizer,
        batch: &[RecognitionJob],
    ) -> Result<Vec<(usize, RecognitionOutcome)>, SchedulerError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if let Err(e) = self.ensure_started(batch.len()) {
            self.processes.clear();
            return Err(e);
        }
        let chunk_size = batch.len().div_ceil(self.processes.len()).max(1);

        let results = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .processes
                .iter_mut()
                .zip(batch.chunks(chunk_size).enumerate())
                .map(|(process, (chunk_idx, chunk))| {
                    scope.spawn(move || process.handle_all(chunk_idx * chunk_size, chunk))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(SchedulerError::Worker("worker io thread panicked".into())))
                })
                .collect::<Vec<_>>()
        });

        let mut outcomes = Vec::with_capacity(batch.len());
        for result in results {
            match result {
                Ok(mut handled) => outcomes.append(&mut handled),
                Err(e) => {
                    // A worker in an unknown protocol state is never reused.
                    self.processes.clear();
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }
}

/// One running worker and its pipes. Killed on drop.
struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn spawn(command: &WorkerCommand, params_fingerprint: &str) -> Result<Self, SchedulerError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(SchedulerError::Spawn)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SchedulerError::Worker("worker pipes unavailable".into()));
            }
        };
        let mut process = Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        };

        let hello: WorkerHello = process.receive()?;
        if hello.params_fingerprint != params_fingerprint {
            return Err(SchedulerError::Worker(format!(
                "worker recognizes with parameters {} but this run uses {}",
                hello.params_fingerprint, params_fingerprint
            )));
        }
        Ok(process)
    }

    /// Send each job and wait for its answer before sending the next.
    fn handle_all(
        &mut self,
        offset: usize,
        chunk: &[RecognitionJob],
    ) -> Result<Vec<(usize, RecognitionOutcome)>, SchedulerError> {
        let mut outcomes = Vec::with_capacity(chunk.len());
        for (i, job) in chunk.iter().enumerate() {
            let index = offset + i;
            self.send(&WorkerRequest { index, path: job.source.clone() })?;
            let response: WorkerResponse = self.receive()?;
            if response.index != index {
                return Err(SchedulerError::Worker(format!(
                    "expected response {index}, got {}",
                    response.index
                )));
            }
            outcomes.push((index, response.outcome));
        }
        Ok(outcomes)
    }

    fn send(&mut self, request: &WorkerRequest) -> Result<(), SchedulerError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SchedulerError::Worker("worker stdin closed".into()))?;
        let written = serde_json::to_writer(&mut *stdin, request)
            .map_err(io::Error::from)
            .and_then(|()| stdin.write_all(b"\n"))
            .and_then(|()| stdin.flush());
        written.map_err(|e| SchedulerError::Worker(format!("writing request: {e}")))
    }

    fn receive<T: DeserializeOwned>(&mut self) -> Result<T, SchedulerError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .stdout
                .read_line(&mut line)
                .map_err(|e| SchedulerError::Worker(format!("reading response: {e}")))?;
            if read == 0 {
                return Err(SchedulerError::Worker("worker exited early".into()));
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        serde_json::from_str(line.trim())
            .map_err(|e| SchedulerError::Worker(format!("malformed response: {e}")))
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // Closing stdin lets an idle worker finish on its own.
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
