use std::{error::Error, path::PathBuf, process::exit};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridq::{
    build_and_submit,
    config::ConfigError,
    scheduler::{self, POLL_INTERVAL},
    BatchConfig, GridEngine,
};

/// Submit a batch of dependent jobs to an SGE-style grid scheduler
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// YAML batch description
    config: PathBuf,

    /// Override the root output directory from the batch description
    #[arg(long)]
    root: Option<PathBuf>,

    /// Build directories and job scripts, then print each submission
    /// instead of running it
    #[arg(long)]
    dry_run: bool,

    /// After submitting, poll the scheduler until every job has finished
    #[arg(long)]
    wait: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(&cli) {
        error!(error = ?error, "batch submission failed: {error}");
        exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = BatchConfig::load(&cli.config)?;
    if config.preflight_checks() {
        return Err(ConfigError::Invalid.into());
    }

    let root = cli.root.clone().unwrap_or_else(|| config.root.clone());
    let mut batch = config.build_batch()?;

    if cli.dry_run {
        scheduler::build_directories(&root)?;
        batch.write_scripts(&root)?;

        for job in batch.jobs() {
            println!(
                "qsub {}",
                scheduler::submit_args(job, &root, &config.args).join(" ")
            );
        }

        return Ok(());
    }

    let engine = GridEngine::new(config.scheduler.qsub.clone(), config.scheduler.qstat.clone())?;

    build_and_submit(&engine, &mut batch, &root, &config.args)?;
    info!("submitted {} job(s) under {}", batch.len(), root.display());

    if cli.wait {
        for job in batch.jobs_mut() {
            engine.wait(job, POLL_INTERVAL)?;
            info!(job = %job.name, "finished");
        }
    }

    Ok(())
}
