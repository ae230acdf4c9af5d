//! Array job script generation for parameter sweeps.
//!
//! A sweep maps variable names to value lists. The scheduler runs the
//! resulting script once per combination, passing only a single linear
//! task id in `$SGE_TASK_ID`; the script itself decodes that id into one
//! value per variable with mixed-radix arithmetic, so the full cross
//! product never has to be stored anywhere.

use std::collections::BTreeMap;

use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("sweep variable {0} has no values")]
    EmptyValues(String),
}

/// Build the array script for `command` and return it together with the
/// total task count (the product of all value list lengths).
///
/// Variables are processed in lexicographic name order, which makes the
/// generated decode arithmetic derivable from the values alone, independent
/// of insertion order. An empty sweep yields a single task that runs the
/// command unconditionally. Task ids from the scheduler are 1-based; the
/// first line of the script shifts to 0-based before decoding.
pub(crate) fn expand(
    command: &str,
    values: &BTreeMap<String, Vec<String>>,
) -> Result<(String, usize), SweepError> {
    let mut script = String::new();
    let mut total = 1;

    script.push_str("let \"TASK_ID=$SGE_TASK_ID - 1\"\n");

    // array literals, one per variable
    for (key, vals) in values.iter() {
        if vals.is_empty() {
            // would make the task count 0 and divide by zero below
            return Err(SweepError::EmptyValues(key.clone()));
        }

        script.push_str(&format!("{key}_ARRAY=( {} )\n", vals.iter().join(" ")));
        total *= vals.len();
    }
    script.push('\n');

    // decode logic: each variable consumes its digit from the task id
    for (key, vals) in values.iter() {
        let count = vals.len();
        script.push_str(&format!("let \"{key}_INDEX=$TASK_ID % {count}\"\n"));
        script.push_str(&format!("{key}=${{{key}_ARRAY[${key}_INDEX]}}\n"));
        script.push_str(&format!("let \"TASK_ID=$TASK_ID / {count}\"\n"));
    }
    script.push('\n');

    script.push_str(command);
    script.push('\n');

    Ok((script, total))
}
