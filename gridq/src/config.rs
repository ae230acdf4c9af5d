//! YAML batch descriptions for the command line front end.

use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::{
    batch::Batch,
    job::{sanitize_name, Job},
    sweep::SweepError,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read batch description")]
    Io(#[from] std::io::Error),
    #[error("failed to parse batch description")]
    Parse(#[from] serde_yaml::Error),
    #[error("batch description is invalid")]
    Invalid,
    #[error("invalid parameter sweep")]
    Sweep(#[from] SweepError),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    // where to find the scheduler CLI, both optional with a PATH fallback
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Root directory for job scripts and scheduler output
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Passthrough arguments appended to every submission, after the
    /// structural flags
    #[serde(default)]
    pub args: Vec<String>,

    /// Jobs keyed by name
    pub jobs: BTreeMap<String, JobConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    pub qsub: Option<PathBuf>,
    pub qstat: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Command line; for sweep jobs a template referencing the sweep
    /// variables (`$foo`)
    pub command: String,
    pub queue: Option<String>,
    /// Names of jobs that must be submitted before this one
    #[serde(default)]
    pub depends: Vec<String>,
    /// Parameter name -> values; non-empty turns the job into an array job
    /// over every combination
    #[serde(default)]
    pub sweep: BTreeMap<String, Vec<String>>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl BatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;

        Ok(serde_yaml::from_reader(file)?)
    }

    /// Validate the whole description, reporting every problem instead of
    /// stopping at the first one to make fixing a description less painful.
    /// Returns whether any error was found.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.jobs.is_empty() {
            error!("No jobs were defined, nothing to submit");
            contains_error = true;
        }

        // two names that sanitize to the same identifier would silently
        // collapse into a single job
        let mut sanitized: BTreeMap<String, &str> = BTreeMap::new();
        for name in self.jobs.keys() {
            if let Some(previous) = sanitized.insert(sanitize_name(name), name) {
                error!("jobs.{name} and jobs.{previous} use the same name after sanitization");
                contains_error = true;
            }
        }

        for (name, job) in self.jobs.iter() {
            if job.command.trim().is_empty() {
                error!("jobs.{name}.command is empty");
                contains_error = true;
            }

            for dep in job.depends.iter() {
                if dep == name {
                    error!("jobs.{name} depends on itself");
                    contains_error = true;
                } else if !self.jobs.contains_key(dep) {
                    error!("jobs.{name} depends on {dep} but {dep} is not defined");
                    contains_error = true;
                }
            }

            for (key, values) in job.sweep.iter() {
                if values.is_empty() {
                    error!("jobs.{name}.sweep.{key} has no values");
                    contains_error = true;
                }
            }
        }

        contains_error
    }

    /// Turn the description into a [`Batch`] with dependency edges wired up
    pub fn build_batch(&self) -> Result<Batch, ConfigError> {
        let mut batch = Batch::new();

        for (name, config) in self.jobs.iter() {
            let mut job = if config.sweep.is_empty() {
                Job::new(name, &config.command)
            } else {
                Job::array(name, &config.command, &config.sweep)?
            };

            if let Some(queue) = &config.queue {
                job = job.queue(queue);
            }

            // edges reference jobs by sanitized name, same as Job::new
            for dep in config.depends.iter() {
                job.dependencies.insert(sanitize_name(dep));
            }

            batch.add(job);
        }

        Ok(batch)
    }
}
