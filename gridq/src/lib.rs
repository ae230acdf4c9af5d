//! Dependency-ordered batch submission for SGE-style grid schedulers.
//!
//! Jobs are plain shell commands, optionally expanded into array jobs over
//! every combination of a parameter sweep. Dependency edges hold a job back
//! until everything it depends on has been *accepted* by the scheduler;
//! actual run-order holds are the scheduler's business, expressed through
//! its hold list.
//!
//! ```no_run
//! use gridq::{build_and_submit, Batch, GridEngine, Job};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let first = Job::new("annotate", "annotate genomes/");
//! let mut second = Job::new("summarise", "summarise output/");
//! second.add_dependency(&first);
//!
//! let engine = GridEngine::new(None, None)?;
//! let mut batch: Batch = [first, second].into_iter().collect();
//! build_and_submit(&engine, &mut batch, Path::new("work"), &[])?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

pub mod batch;
pub mod config;
pub mod job;
pub mod scheduler;
pub mod sweep;


pub use batch::{Batch, DrainError};
pub use config::BatchConfig;
pub use job::Job;
pub use scheduler::{GridEngine, SubmitError};
pub use sweep::SweepError;

/// Set up the output layout below `root`, materialize every job script and
/// drain the batch in dependency order.
///
/// Returns once every job has been submitted, not necessarily finished.
/// The caller keeps the batch, so after an error the `submitted` flags
/// record exactly how far submission got.
pub fn build_and_submit(
    engine: &GridEngine,
    batch: &mut Batch,
    root: &Path,
    extra: &[String],
) -> Result<(), DrainError> {
    scheduler::build_directories(root)?;
    batch.write_scripts(root)?;
    batch.drain(engine, root, extra)
}
