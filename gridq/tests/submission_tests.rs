use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use gridq::{build_and_submit, Batch, DrainError, GridEngine, Job, SubmitError};
use tempfile::TempDir;

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
}

/// Fake submit command that records each invocation's argv as one line and
/// accepts everything
fn recording_qsub(dir: &Path, log: &Path) -> PathBuf {
    let path = dir.join("qsub");
    write_executable(
        &path,
        &format!("#!/bin/sh\necho \"$@\" >> {}\nexit 0\n", log.display()),
    );

    path
}

fn engine_with(qsub: PathBuf) -> GridEngine {
    GridEngine::new(Some(qsub), Some(PathBuf::from("/nonexistent/qstat"))).unwrap()
}

fn read_log(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn line_for<'a>(log: &'a [String], name: &str) -> Option<(usize, &'a String)> {
    let flag = format!("-N {name} ");
    log.iter().enumerate().find(|(_, line)| line.contains(&flag))
}

#[test]
fn single_job_submission_lays_out_directories_and_script() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let engine = engine_with(recording_qsub(dir.path(), &log));
    let root = dir.path().join("work");

    let mut batch = Batch::from(Job::new("hello world", "echo hi"));
    build_and_submit(&engine, &mut batch, &root, &[]).unwrap();

    for subdir in ["jobs", "stdout", "stderr", "output"] {
        assert!(root.join(subdir).is_dir(), "{subdir} missing");
    }

    let script = fs::read_to_string(root.join("jobs/hello_world")).unwrap();
    assert!(script.starts_with("#!/bin/sh\n#$ -S /bin/bash\n"));
    assert!(script.contains("echo hi\n"));

    let job = batch.get("hello_world").unwrap();
    assert!(job.submitted);
    assert_eq!(job.script_path.as_deref(), Some(root.join("jobs/hello_world").as_path()));

    let log = read_log(&log);
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("-V"));
    assert!(log[0].contains("-N hello_world"));
    assert!(log[0].contains(&format!("-o {}", root.join("stdout").display())));
    assert!(log[0].contains(&format!("-e {}", root.join("stderr").display())));
}

#[test]
fn drain_sets_up_the_output_layout_on_a_fresh_root() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let engine = engine_with(recording_qsub(dir.path(), &log));
    // drain directly, without the entry point's directory setup
    let root = dir.path().join("untouched");

    let mut batch = Batch::from(Job::new("lone", "echo hi"));
    batch.drain(&engine, &root, &[]).unwrap();

    for subdir in ["jobs", "stdout", "stderr", "output"] {
        assert!(root.join(subdir).is_dir(), "{subdir} missing");
    }
    assert!(root.join("jobs/lone").is_file());
    assert!(batch.get("lone").unwrap().submitted);
    assert_eq!(read_log(&log).len(), 1);
}

#[test]
fn passes_respect_dependency_order() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let engine = engine_with(recording_qsub(dir.path(), &log));

    let a = Job::new("a", "echo 1");
    let b = Job::new("b", "echo 2");
    let mut c = Job::new("c", "echo 3");
    c.add_dependency(&a);
    c.add_dependency(&b);

    let mut batch: Batch = [a, b, c].into_iter().collect();
    build_and_submit(&engine, &mut batch, dir.path(), &[]).unwrap();

    assert!(batch.jobs().all(|job| job.submitted));

    let log = read_log(&log);
    assert_eq!(log.len(), 3);

    // a and b form the first pass in either order, c always comes last
    let (a_at, _) = line_for(&log, "a").unwrap();
    let (b_at, _) = line_for(&log, "b").unwrap();
    let (c_at, c_line) = line_for(&log, "c").unwrap();
    assert!(c_at > a_at && c_at > b_at);
    assert!(c_line.contains("-hold_jid a,b"));
}

#[test]
fn array_job_gets_a_task_range_plain_job_does_not() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let engine = engine_with(recording_qsub(dir.path(), &log));

    let mut values = BTreeMap::new();
    values.insert("x".to_string(), vec!["1".to_string(), "2".to_string()]);
    values.insert(
        "y".to_string(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()],
    );

    let plain = Job::new("plain", "echo 1");
    let sweep = Job::array("sweep", "tool -x $x -y $y", &values).unwrap();
    let mut batch: Batch = [plain, sweep].into_iter().collect();

    build_and_submit(&engine, &mut batch, dir.path(), &[]).unwrap();

    let log = read_log(&log);
    let (_, plain_line) = line_for(&log, "plain").unwrap();
    let (_, sweep_line) = line_for(&log, "sweep").unwrap();
    assert!(!plain_line.contains("-t "));
    assert!(sweep_line.contains("-t 1:6"));
}

#[test]
fn caller_extras_are_appended_after_the_script_path() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let engine = engine_with(recording_qsub(dir.path(), &log));

    let mut batch = Batch::from(Job::new("job", "echo 1"));
    let extra = vec!["-l".to_string(), "h_vmem=4G".to_string()];
    build_and_submit(&engine, &mut batch, dir.path(), &extra).unwrap();

    let log = read_log(&log);
    assert!(log[0].ends_with("-l h_vmem=4G"));
    assert!(log[0].contains(&format!("{} -l", dir.path().join("jobs/job").display())));
}

#[test]
fn rejected_job_surfaces_but_the_rest_of_the_pass_runs() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("qsub.log");
    let qsub = dir.path().join("qsub");
    // accepts everything except jobs named *bad*
    write_executable(
        &qsub,
        &format!(
            "#!/bin/sh\necho \"$@\" >> {}\ncase \"$*\" in *bad*) exit 7 ;; esac\nexit 0\n",
            log.display()
        ),
    );
    let engine = engine_with(qsub);

    let good = Job::new("good", "echo 1");
    let bad = Job::new("bad", "echo 2");
    let mut blocked = Job::new("blocked", "echo 3");
    blocked.add_dependency(&bad);

    let mut batch: Batch = [good, bad, blocked].into_iter().collect();
    match build_and_submit(&engine, &mut batch, dir.path(), &[]) {
        Err(DrainError::Submit(SubmitError::SubmissionFailed { job, status })) => {
            assert_eq!(job, "bad");
            assert_eq!(status, 7);
        }
        other => panic!("expected SubmissionFailed, got {other:?}"),
    }

    // both first-pass jobs were attempted, the dependent pass never ran
    let log = read_log(&log);
    assert!(line_for(&log, "good").is_some());
    assert!(line_for(&log, "bad").is_some());
    assert!(line_for(&log, "blocked").is_none());

    assert!(batch.get("good").unwrap().submitted);
    assert!(!batch.get("bad").unwrap().submitted);
    assert!(!batch.get("blocked").unwrap().submitted);

    // redirection paths track acceptance, like the submitted flag
    let good = batch.get("good").unwrap();
    assert_eq!(good.stdout_path.as_deref(), Some(dir.path().join("stdout").as_path()));
    assert_eq!(good.stderr_path.as_deref(), Some(dir.path().join("stderr").as_path()));
    let bad = batch.get("bad").unwrap();
    assert!(bad.stdout_path.is_none());
    assert!(bad.stderr_path.is_none());
}

#[test]
fn missing_submit_executable_fails_without_marking_jobs() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path().join("no-such-qsub"));

    let mut batch = Batch::from(Job::new("job", "echo 1"));
    match build_and_submit(&engine, &mut batch, dir.path(), &[]) {
        Err(DrainError::Submit(SubmitError::Io(_))) => {}
        other => panic!("expected Io error, got {other:?}"),
    }

    assert!(!batch.get("job").unwrap().submitted);
}

#[test]
fn wait_polls_until_the_scheduler_forgets_the_job() {
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("polls");
    let qstat = dir.path().join("qstat");
    // report the job as active for two polls, gone from the third on
    write_executable(
        &qstat,
        &format!(
            "#!/bin/sh\nn=0\n[ -f {c} ] && n=$(cat {c})\nn=$((n+1))\necho $n > {c}\n[ $n -ge 3 ] && exit 1\nexit 0\n",
            c = counter.display()
        ),
    );
    let engine = GridEngine::new(Some(dir.path().join("missing-qsub")), Some(qstat)).unwrap();

    let mut job = Job::new("job", "echo 1");
    engine
        .wait(&mut job, Duration::from_millis(1))
        .unwrap();

    assert!(job.finished);
    assert_eq!(fs::read_to_string(&counter).unwrap().trim(), "3");
}

#[test]
fn wait_with_missing_status_executable_is_an_error() {
    let dir = TempDir::new().unwrap();
    let engine = GridEngine::new(
        Some(dir.path().join("missing-qsub")),
        Some(dir.path().join("missing-qstat")),
    )
    .unwrap();

    let mut job = Job::new("job", "echo 1");
    assert!(engine.wait(&mut job, Duration::from_millis(1)).is_err());
    assert!(!job.finished);
}

#[test]
fn generated_array_script_runs_every_combination_exactly_once() {
    // end-to-end check of the decode arithmetic by actually executing the
    // script the way the scheduler would, once per task id
    if Command::new("bash").arg("--version").output().is_err() {
        eprintln!("bash not available, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let mut values = BTreeMap::new();
    values.insert("x".to_string(), vec!["1".to_string(), "2".to_string()]);
    values.insert(
        "y".to_string(),
        vec!["a".to_string(), "b".to_string(), "c".to_string()],
    );
    let job = Job::array("sweep", "echo $x $y", &values).unwrap();
    assert_eq!(job.tasks, 6);

    let script = dir.path().join("sweep.sh");
    fs::write(&script, &job.script).unwrap();

    // scheduler task ids are 1-based
    let mut seen = BTreeSet::new();
    for task in 1..=job.tasks {
        let output = Command::new("bash")
            .arg(&script)
            .env("SGE_TASK_ID", task.to_string())
            .output()
            .unwrap();
        assert!(output.status.success());
        seen.insert(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let expected: BTreeSet<String> = ["1 a", "1 b", "1 c", "2 a", "2 b", "2 c"]
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(seen, expected);
}
