//! Dependency resolution over a batch of jobs.
//!
//! A job is submittable once every job it depends on has been submitted.
//! Draining repeatedly extracts the submittable subset and dispatches it,
//! pass by pass, until nothing is pending; a pass that extracts nothing
//! while jobs remain pending means the remaining dependency graph has a
//! cycle and fails instead of looping forever.

use std::{collections::BTreeMap, path::Path};

use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::{
    job::Job,
    scheduler::{self, GridEngine, SubmitError},
};

#[derive(Error, Debug)]
pub enum DrainError {
    #[error("job {job} depends on itself")]
    SelfDependency { job: String },
    #[error("job {job} depends on {dependency}, which is not in the batch")]
    UnknownDependency { job: String, dependency: String },
    #[error("dependency cycle, no submittable job among: {}", stuck.iter().join(", "))]
    CyclicDependency { stuck: Vec<String> },
    #[error("submission failed")]
    Submit(#[from] SubmitError),
}

/// All jobs submitted together through one entry-point call, keyed by name
#[derive(Debug, Default)]
pub struct Batch {
    jobs: BTreeMap<String, Job>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to the batch. A job with the same name replaces the
    /// earlier one; keeping names unique is the caller's contract.
    pub fn add(&mut self, job: Job) {
        self.jobs.insert(job.name.clone(), job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    /// Names of the pending jobs whose every dependency has been submitted.
    ///
    /// Pure query, mutates nothing. A dependency that is missing from the
    /// batch counts as unsatisfied here; [`Batch::drain`] rejects such
    /// edges up front.
    pub fn extract_submittable(&self) -> Vec<&str> {
        self.jobs
            .values()
            .filter(|job| !job.submitted)
            .filter(|job| {
                job.dependencies
                    .iter()
                    .all(|dep| self.jobs.get(dep).map_or(false, |dep| dep.submitted))
            })
            .map(|job| job.name.as_str())
            .collect()
    }

    /// Reject self-dependencies and edges pointing outside the batch
    pub(crate) fn validate(&self) -> Result<(), DrainError> {
        for job in self.jobs.values() {
            for dep in job.dependencies.iter() {
                if *dep == job.name {
                    return Err(DrainError::SelfDependency {
                        job: job.name.clone(),
                    });
                }

                if !self.jobs.contains_key(dep) {
                    return Err(DrainError::UnknownDependency {
                        job: job.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Materialize every job's script below `root`
    pub fn write_scripts(&mut self, root: &Path) -> Result<(), SubmitError> {
        for job in self.jobs.values_mut() {
            scheduler::write_script(job, root)?;
        }

        Ok(())
    }

    /// Submit the whole batch in dependency order.
    ///
    /// Each pass extracts the submittable subset and dispatches it through
    /// `engine`. The jobs of one pass are independent of each other by
    /// construction, so the pass fans out on the rayon pool; every job of
    /// the pass is attempted before a failure surfaces (best-effort within
    /// the pass), and the pass joins before the next extraction. On error
    /// the `submitted` flags show exactly which jobs the scheduler
    /// accepted, so the caller can decide whether to resume or abort;
    /// nothing is retried here since resubmission would duplicate jobs.
    #[tracing::instrument(skip(self, engine, extra), level = "info")]
    pub fn drain(
        &mut self,
        engine: &GridEngine,
        root: &Path,
        extra: &[String],
    ) -> Result<(), DrainError> {
        self.validate()?;

        let mut pass = 0usize;
        loop {
            let ready = self
                .extract_submittable()
                .iter()
                .map(|name| name.to_string())
                .collect_vec();

            if ready.is_empty() {
                let stuck = self
                    .jobs
                    .values()
                    .filter(|job| !job.submitted)
                    .map(|job| job.name.clone())
                    .collect_vec();

                if stuck.is_empty() {
                    return Ok(());
                }

                return Err(DrainError::CyclicDependency { stuck });
            }

            pass += 1;
            info!("pass {pass}: submitting {} job(s)", ready.len());

            let mut taken = ready
                .iter()
                .filter_map(|name| self.jobs.remove(name))
                .collect_vec();

            let errors: Vec<Option<SubmitError>> = taken
                .par_iter_mut()
                .map(|job| engine.submit(job, root, extra).err())
                .collect();

            for job in taken {
                self.jobs.insert(job.name.clone(), job);
            }

            // first error in name order, the rest of the pass already ran
            if let Some(error) = errors.into_iter().flatten().next() {
                return Err(error.into());
            }
        }
    }
}

impl FromIterator<Job> for Batch {
    fn from_iter<I: IntoIterator<Item = Job>>(iter: I) -> Self {
        let mut batch = Batch::new();
        for job in iter {
            batch.add(job);
        }

        batch
    }
}

impl From<Job> for Batch {
    fn from(job: Job) -> Self {
        std::iter::once(job).collect()
    }
}
