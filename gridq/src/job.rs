use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use crate::sweep::{self, SweepError};

/// Replace whitespace and anything else outside `[A-Za-z0-9._-]` with `_`.
///
/// Job names end up in three places that all have their own escaping rules:
/// the script filename under `root/jobs/`, the `-N` argument, and elements
/// of the comma-separated `-hold_jid` list. Reducing the name to a safe
/// character set once at construction keeps all three in sync, so the name
/// read back from a job is byte-for-byte the name the scheduler sees.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One schedulable unit of work: a shell command, or an array of command
/// variants expanded from a parameter sweep.
///
/// `dependencies` holds the names of jobs that must have been *submitted*
/// (accepted by the scheduler) before this one may be submitted. Run order
/// is the scheduler's job, enforced through its hold list.
#[derive(Debug, Clone)]
pub struct Job {
    /// Sanitized identifier, unique within a batch (the caller's contract)
    pub name: String,
    /// Command line to run, or the command template for array jobs
    pub command: String,
    /// Script body as written to disk, minus the shebang header
    pub script: String,
    /// Queue to request from the scheduler, if any
    pub queue: Option<String>,
    /// Sanitized names of jobs that must be submitted before this one
    pub dependencies: BTreeSet<String>,
    /// Set once the scheduler has accepted the job, never reset
    pub submitted: bool,
    pub finished: bool,
    /// Number of array tasks, 1 for plain jobs
    pub tasks: usize,
    pub script_path: Option<PathBuf>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

impl Job {
    pub fn new(name: &str, command: &str) -> Self {
        Self {
            name: sanitize_name(name),
            command: command.to_owned(),
            script: command.to_owned(),
            queue: None,
            dependencies: BTreeSet::new(),
            submitted: false,
            finished: false,
            tasks: 1,
            script_path: None,
            stdout_path: None,
            stderr_path: None,
        }
    }

    /// Parameter-sweep job: one array task per combination of `values`.
    ///
    /// `command` references the sweep variables by name (`$foo`); the
    /// generated script decodes the scheduler's task id into one value per
    /// variable before running it, see [`crate::sweep`].
    pub fn array(
        name: &str,
        command: &str,
        values: &BTreeMap<String, Vec<String>>,
    ) -> Result<Self, SweepError> {
        let (script, tasks) = sweep::expand(command, values)?;
        let mut job = Self::new(name, command);
        job.script = script;
        job.tasks = tasks;
        Ok(job)
    }

    /// Request a specific scheduler queue for this job
    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = Some(queue.to_owned());
        self
    }

    /// Hold this job back until `other` has been submitted.
    ///
    /// No cycle check happens here; cycles are detected once, when the
    /// batch is drained.
    pub fn add_dependency(&mut self, other: &Job) {
        self.dependencies.insert(other.name.clone());
    }

    /// Drop `other` from the dependency set. Removing a job that is not a
    /// dependency is a no-op.
    pub fn remove_dependency(&mut self, other: &Job) {
        self.dependencies.remove(&other.name);
    }
}
