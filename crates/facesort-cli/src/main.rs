use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facesort_core::{CommandBackend, FaceBackend, JsonRegistry};
use facesort_pipeline::{
    worker, Pipeline, PipelineConfig, ProgressReporter, Recognizer, RunReport, SilentReporter,
    WorkerCommand,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod progress;

use progress::CliReporter;

#[derive(Parser)]
#[command(name = "facesort", version, about = "File date-partitioned photos by recognised person")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the output tree in line with the input tree
    Run {
        #[command(flatten)]
        roots: Roots,
        #[command(flatten)]
        setup: Setup,
        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show what a run would reprocess, without writing anything
    Plan {
        #[command(flatten)]
        roots: Roots,
        #[command(flatten)]
        setup: Setup,
    },
    /// Process pool worker: JSON lines on stdin, outcomes on stdout
    #[command(hide = true)]
    Worker {
        #[command(flatten)]
        setup: Setup,
    },
}

#[derive(Args)]
struct Roots {
    /// Date-partitioned photo tree (e.g. 2025-12-21/, 2025/12/21/)
    #[arg(short, long)]
    input: PathBuf,
    /// Output tree, filed as <Person>/<YYYY-MM-DD>/<file>
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Clone)]
struct Setup {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Reference embeddings (JSON); overrides [backend].references
    #[arg(long)]
    references: Option<PathBuf>,
    /// Face detector program; overrides [backend].program
    #[arg(long)]
    backend: Option<PathBuf>,
    /// Argument for the detector, placed before the image path (repeatable)
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    backend_args: Vec<String>,
}

impl Setup {
    /// Arguments that make a `worker` child load the same setup.
    fn worker_args(&self) -> Vec<String> {
        let mut args = vec!["worker".to_string()];
        let mut push_path = |flag: &str, path: &Option<PathBuf>| {
            if let Some(path) = path {
                args.push(flag.to_string());
                args.push(path.display().to_string());
            }
        };
        push_path("--config", &self.config);
        push_path("--references", &self.references);
        push_path("--backend", &self.backend);
        for arg in &self.backend_args {
            args.push(format!("--backend-arg={arg}"));
        }
        args
    }
}

/// Configuration plus the collaborators it names.
struct Loaded {
    config: PipelineConfig,
    backend: Arc<dyn FaceBackend>,
    registry: JsonRegistry,
}

fn load(setup: &Setup) -> Result<Loaded> {
    let mut config = PipelineConfig::load(setup.config.as_deref()).context("loading configuration")?;
    if let Some(program) = &setup.backend {
        config.backend.program = Some(program.clone());
    }
    if !setup.backend_args.is_empty() {
        config.backend.args = setup.backend_args.clone();
    }
    if let Some(references) = &setup.references {
        config.backend.references = Some(references.clone());
    }

    let program = config
        .backend
        .program
        .clone()
        .context("no face backend configured; set [backend].program or pass --backend")?;
    let backend: Arc<dyn FaceBackend> = Arc::new(CommandBackend::new(program, config.backend.args.clone()));

    let registry = match &config.backend.references {
        Some(path) => JsonRegistry::load(path)
            .with_context(|| format!("loading reference embeddings from {}", path.display()))?,
        None => {
            tracing::warn!("no reference embeddings configured; every face will be unmatched");
            JsonRegistry::default()
        }
    };

    Ok(Loaded { config, backend, registry })
}

fn pipeline(setup: &Setup) -> Result<Pipeline> {
    let Loaded { config, backend, registry } = load(setup)?;
    let pipeline = Pipeline::new(config, backend, &registry);
    match std::env::current_exe() {
        Ok(program) => Ok(pipeline.with_worker_command(WorkerCommand {
            program,
            args: setup.worker_args(),
        })),
        Err(e) => {
            tracing::warn!(error = %e, "cannot locate own executable; process pool unavailable");
            Ok(pipeline)
        }
    }
}

fn main() -> Result<()> {
    // stdout carries the worker protocol, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { roots, setup, quiet } => {
            let pipeline = pipeline(&setup)?;
            let reporter: Box<dyn ProgressReporter> = if quiet {
                Box::new(SilentReporter)
            } else {
                Box::new(CliReporter::new())
            };
            let report = pipeline
                .run(&roots.input, &roots.output, reporter.as_ref())
                .with_context(|| format!("filing {} into {}", roots.input.display(), roots.output.display()))?;
            print_report(&report, &roots.output);
        }
        Commands::Plan { roots, setup } => {
            let pipeline = pipeline(&setup)?;
            let preview = pipeline
                .plan(&roots.input, &roots.output)
                .with_context(|| format!("planning {}", roots.input.display()))?;
            let plan = &preview.plan;
            if plan.is_noop() {
                println!("Up to date ({} photos)", plan.snapshot.file_count());
                return Ok(());
            }
            for date in &plan.changed_dates {
                println!("changed  {date}");
            }
            for date in &plan.deleted_dates {
                println!("deleted  {date}");
            }
            println!(
                "{} photos in changed dates: {} cached, {} to recognize",
                plan.changed_file_count(),
                preview.cache_hits,
                preview.to_recognize
            );
        }
        Commands::Worker { setup } => {
            let Loaded { config, backend, registry } = load(&setup)?;
            let recognizer = Recognizer::new(backend, &registry, &config.recognition);
            let served = worker::serve(&recognizer, std::io::stdin().lock(), std::io::stdout().lock())
                .context("worker protocol")?;
            tracing::debug!(served, "worker finished");
        }
    }

    Ok(())
}

fn print_report(report: &RunReport, output: &Path) {
    if report.is_noop() {
        println!("Up to date ({} photos)", report.scanned_files);
        return;
    }
    println!("Output:       {}", output.display());
    println!(
        "Dates:        {} changed, {} deleted",
        report.changed_dates.len(),
        report.deleted_dates.len()
    );
    println!(
        "Photos:       {} recognized, {} from cache",
        report.recognized, report.cache_hits
    );
    println!(
        "Outcomes:     {} matched, {} unmatched, {} without faces, {} errors",
        report.matched, report.unmatched, report.no_face, report.errors
    );
    println!("Clusters:     {}", report.clusters);
    println!(
        "Files:        {} written, {} stale removed",
        report.files_written, report.artifacts_removed
    );
    if let Some(mode) = report.mode {
        let fallback = if report.fallback_used { " (fell back to serial)" } else { "" };
        println!("Execution:    {mode}{fallback}");
    }
}
