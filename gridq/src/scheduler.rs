//! Submission driver and completion poller for SGE-style schedulers.
//!
//! The scheduler is reached exclusively through its CLI: a submit command
//! (`qsub`) that registers a script and exits zero on acceptance, and a
//! status command (`qstat`) whose exit code distinguishes "still known"
//! from "not found/finished".

use std::{
    env, fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job::Job;

/// Base unit of time to wait between scheduler status polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Backoff ceiling for status polls
pub const POLL_CEILING: Duration = Duration::from_secs(60);

/// Header for every job script: run under /bin/sh, ask the scheduler for a
/// bash shell for the array decode arithmetic
const SCRIPT_HEADER: &str = "#!/bin/sh\n#$ -S /bin/bash\n";

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("scheduler executable {0} not found on PATH")]
    SchedulerNotFound(String),
    #[error("io error during submission")]
    Io(#[from] std::io::Error),
    #[error("scheduler rejected job {job} (exit status {status})")]
    SubmissionFailed { job: String, status: i32 },
}

// check if a file is executable
fn check_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    match fs::metadata(path) {
        Ok(metadata) => (metadata.mode() & 0o111) != 0,
        Err(_) => false,
    }
}

/// Walk $PATH for an executable named `name`
fn search_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| check_executable(candidate))
}

/// Location of the script for `name` below `root`
pub fn script_path(root: &Path, name: &str) -> PathBuf {
    root.join("jobs").join(name)
}

/// Create the shared output layout below `root`. Safe to call repeatedly,
/// also while submissions are running in parallel.
///
/// - `jobs`    job scripts
/// - `stdout`  scheduler-redirected stdout
/// - `stderr`  scheduler-redirected stderr
/// - `output`  free for the scripts' own result files
pub fn build_directories(root: &Path) -> Result<(), SubmitError> {
    for subdir in ["output", "stderr", "stdout", "jobs"] {
        fs::create_dir_all(root.join(subdir))?;
    }

    Ok(())
}

/// Materialize `job.script` under `root/jobs` with the scheduler header.
///
/// Sets up the output layout first, so submitting against a fresh root
/// works without a separate setup call.
pub fn write_script(job: &mut Job, root: &Path) -> Result<(), SubmitError> {
    build_directories(root)?;

    let path = script_path(root, &job.name);
    fs::write(&path, format!("{SCRIPT_HEADER}{}\n", job.script))?;

    debug!(job = %job.name, path = ?path, "wrote job script");
    job.script_path = Some(path);

    Ok(())
}

/// The submit command's arguments for `job`, without the executable itself.
///
/// Caller-supplied `extra` goes last, after the structural flags, so caller
/// overrides win wherever the scheduler applies last-flag-wins semantics.
pub fn submit_args(job: &Job, root: &Path, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-V".to_owned(),
        "-N".to_owned(),
        job.name.clone(),
        "-cwd".to_owned(),
        "-o".to_owned(),
        root.join("stdout").to_string_lossy().into_owned(),
        "-e".to_owned(),
        root.join("stderr").to_string_lossy().into_owned(),
    ];

    if let Some(queue) = &job.queue {
        args.push("-q".to_owned());
        args.push(queue.clone());
    }

    if job.tasks > 1 {
        args.push("-t".to_owned());
        args.push(format!("1:{}", job.tasks));
    }

    if !job.dependencies.is_empty() {
        args.push("-hold_jid".to_owned());
        args.push(job.dependencies.iter().join(","));
    }

    let script = match &job.script_path {
        Some(path) => path.clone(),
        None => script_path(root, &job.name),
    };
    args.push(script.to_string_lossy().into_owned());
    args.extend(extra.iter().cloned());

    args
}

/// Handle on the external scheduler's CLI
#[derive(Debug, Clone)]
pub struct GridEngine {
    qsub: PathBuf,
    qstat: PathBuf,
}

impl GridEngine {
    /// Resolve the scheduler executables.
    ///
    /// Explicit paths are taken as-is; for any that is unset the $PATH is
    /// searched for the conventional name (`qsub`, `qstat`) with an execute
    /// bit, failing with [`SubmitError::SchedulerNotFound`] otherwise.
    pub fn new(qsub: Option<PathBuf>, qstat: Option<PathBuf>) -> Result<Self, SubmitError> {
        let qsub = match qsub {
            Some(path) => path,
            None => {
                search_path("qsub").ok_or_else(|| SubmitError::SchedulerNotFound("qsub".into()))?
            }
        };
        let qstat = match qstat {
            Some(path) => path,
            None => {
                search_path("qstat").ok_or_else(|| SubmitError::SchedulerNotFound("qstat".into()))?
            }
        };

        Ok(Self { qsub, qstat })
    }

    /// Submit `job`, materializing its script first if that has not
    /// happened yet.
    ///
    /// `submitted` is only set once the submit command exits zero; a
    /// missing executable or a rejection surfaces as an error and leaves
    /// the flag untouched.
    #[tracing::instrument(skip(self, job, extra), fields(job = %job.name), level = "debug")]
    pub fn submit(&self, job: &mut Job, root: &Path, extra: &[String]) -> Result<(), SubmitError> {
        if job.script_path.is_none() {
            write_script(job, root)?;
        }

        let args = submit_args(job, root, extra);
        debug!(args = ?args, "invoking {}", self.qsub.display());

        let output = Command::new(&self.qsub)
            .args(&args)
            .stdin(Stdio::null())
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status, stderr = %stderr, "scheduler rejected job");

            return Err(SubmitError::SubmissionFailed {
                job: job.name.clone(),
                status: output.status.code().unwrap_or(-1),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim());
        }

        // the path fields track acceptance, same as the submitted flag
        job.stdout_path = Some(root.join("stdout"));
        job.stderr_path = Some(root.join("stderr"));
        job.submitted = true;

        Ok(())
    }

    /// Block until the scheduler no longer reports `job`, polling its
    /// status command with exponential backoff (doubled each round, capped
    /// at [`POLL_CEILING`]).
    ///
    /// There is no internal timeout; a caller that needs a deadline has to
    /// run this on a thread it can abandon.
    pub fn wait(&self, job: &mut Job, mut interval: Duration) -> Result<(), SubmitError> {
        while !job.finished {
            thread::sleep(interval);
            interval = (interval * 2).min(POLL_CEILING);

            let status = Command::new(&self.qstat)
                .arg("-j")
                .arg(&job.name)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()?;

            // the status command exits zero while the job is still known
            job.finished = !status.success();
        }

        Ok(())
    }
}
