//! Integration tests driving real engine subprocesses.
//!
//! The shell engine is always available; Python tests are ignored by
//! default and run with `cargo test -- --ignored`.

#![cfg(unix)]

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use quire_core::engine::EngineProcess;
use quire_core::{
    CellKind, CellResult, CellStatus, Engine, EngineConfig, EngineState, Error, KernelState,
    NotebookDirs, Scheduler, SchedulerConfig,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn shell_scheduler(temp: &TempDir) -> Scheduler {
    scheduler_with(temp, EngineConfig::shell())
}

fn scheduler_with(temp: &TempDir, engine: EngineConfig) -> Scheduler {
    let config = SchedulerConfig {
        poll_interval_ms: 10,
        worker_poll_interval_ms: 10,
        engine,
    };
    let dirs = NotebookDirs::new(temp.path()).unwrap();
    Scheduler::new(config, dirs).unwrap()
}

#[test]
fn test_shell_engine_round_trip() {
    let temp = TempDir::new().unwrap();
    let mut engine = EngineProcess::new(EngineConfig::shell(), temp.path());

    let blob = engine.run("echo $((1 + 1))").unwrap().unwrap();
    assert_eq!(blob.text.trim(), "2");
    assert!(blob.files.is_empty());
    assert_eq!(engine.state(), EngineState::Started);

    // State survives between queries.
    engine.run("x=41").unwrap();
    let blob = engine.run("echo $((x + 1))").unwrap().unwrap();
    assert_eq!(blob.text.trim(), "42");
}

#[test]
fn test_scratch_files_are_listed_and_purged() {
    let temp = TempDir::new().unwrap();
    let mut engine = EngineProcess::new(EngineConfig::shell(), temp.path());

    let blob = engine.run("echo data > plot0.png; echo note > b.txt").unwrap().unwrap();
    assert_eq!(blob.files, vec!["b.txt".to_string(), "plot0.png".to_string()]);
    assert!(blob.path.starts_with(temp.path()));

    let dirs: Vec<PathBuf> = engine.scratch_dirs().map(PathBuf::from).collect();
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].exists());

    engine.teardown();
    assert!(!dirs[0].exists());
    assert_eq!(engine.state(), EngineState::Terminated);
}

#[test]
fn test_engine_exit_is_reported() {
    let temp = TempDir::new().unwrap();
    let mut engine = EngineProcess::new(EngineConfig::shell(), temp.path());
    engine.start().unwrap();

    let err = engine.run("exit 3").unwrap_err();
    assert!(matches!(err, Error::EngineExited));
    assert_eq!(engine.state(), EngineState::Terminated);
}

#[test]
fn test_query_timeout_interrupts() {
    let temp = TempDir::new().unwrap();
    let config = EngineConfig {
        query_timeout_ms: Some(200),
        ..EngineConfig::shell()
    };
    let mut engine = EngineProcess::new(config, temp.path());

    let started = Instant::now();
    // The interrupt ends `sleep`, so the prompt comes back within the grace.
    engine.run("sleep 30").unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let blob = engine.run("echo still here").unwrap().unwrap();
    assert_eq!(blob.text.trim(), "still here");
}

#[test]
fn test_scheduler_with_shell_engine() {
    let temp = TempDir::new().unwrap();
    let mut scheduler = shell_scheduler(&temp);
    let doc = scheduler.create_document("shell").unwrap();
    let cell = scheduler.push_cell(doc, CellKind::Code, "echo hello").unwrap();

    scheduler.evaluate(doc, cell).unwrap();
    let done = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(cell).unwrap().result().is_some()
    });
    assert!(done);

    let document = scheduler.document(doc).unwrap();
    assert_eq!(
        document.cell(cell).unwrap().result(),
        Some(&CellResult::Text("hello".into()))
    );
    assert_eq!(document.kernel_state(), KernelState::Running);
}

#[test]
fn test_image_is_promoted_into_document() {
    let temp = TempDir::new().unwrap();
    let mut scheduler = shell_scheduler(&temp);
    let doc = scheduler.create_document("plots").unwrap();
    let cell = scheduler
        .push_cell(doc, CellKind::Code, "echo one > plot1.png; echo two > plot2.png")
        .unwrap();

    scheduler.evaluate(doc, cell).unwrap();
    let done = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(cell).unwrap().result().is_some()
    });
    assert!(done);

    let expected = temp.path().join("plots").join("result0.png");
    let document = scheduler.document(doc).unwrap();
    assert_eq!(
        document.cell(cell).unwrap().result(),
        Some(&CellResult::ImageAsset(expected.clone()))
    );
    assert_eq!(fs::read_to_string(&expected).unwrap(), "two\n");
}

#[test]
fn test_missing_engine_gives_empty_result() {
    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler_with(
        &temp,
        EngineConfig {
            program: "quire-no-such-engine".to_string(),
            ..EngineConfig::shell()
        },
    );
    let doc = scheduler.create_document("broken").unwrap();
    let cell = scheduler.push_cell(doc, CellKind::Code, "echo hi").unwrap();

    scheduler.evaluate(doc, cell).unwrap();
    assert!(scheduler.wait_idle(doc, TIMEOUT));

    let document = scheduler.document(doc).unwrap();
    assert_eq!(document.cell(cell).unwrap().status(), CellStatus::Idle);
    assert_eq!(document.cell(cell).unwrap().result(), None);
}

#[test]
fn test_stop_interrupts_running_command() {
    let temp = TempDir::new().unwrap();
    let mut scheduler = shell_scheduler(&temp);
    let doc = scheduler.create_document("shell").unwrap();
    let slow = scheduler.push_cell(doc, CellKind::Code, "sleep 30").unwrap();
    let next = scheduler.push_cell(doc, CellKind::Code, "echo after").unwrap();

    scheduler.evaluate(doc, slow).unwrap();
    let running = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(slow).unwrap().status() == CellStatus::EvaluationInProgress
    });
    assert!(running);

    let started = Instant::now();
    scheduler.stop_evaluation(doc, slow).unwrap();
    scheduler.evaluate(doc, next).unwrap();
    let done = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(next).unwrap().result().is_some()
    });
    assert!(done);
    assert!(started.elapsed() < Duration::from_secs(5));

    let document = scheduler.document(doc).unwrap();
    assert_eq!(document.cell(slow).unwrap().result(), None);
    assert_eq!(
        document.cell(next).unwrap().result(),
        Some(&CellResult::Text("after".into()))
    );
}

#[test]
#[ignore = "requires python3"]
fn test_python_engine_displays_last_expression() {
    let temp = TempDir::new().unwrap();
    let mut engine = EngineProcess::new(EngineConfig::default(), temp.path());

    let blob = engine.run("x = 20\nx * 2 + 2").unwrap().unwrap();
    assert_eq!(blob.text.trim(), "42");

    let blob = engine.run("for i in range(3):\n    print(i)").unwrap().unwrap();
    assert_eq!(blob.text.trim(), "0\n1\n2");
}

#[test]
#[ignore = "requires python3"]
fn test_python_engine_is_interruptible() {
    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler_with(&temp, EngineConfig::default());
    let doc = scheduler.create_document("python").unwrap();
    let slow = scheduler
        .push_cell(doc, CellKind::Code, "import time\ntime.sleep(30)")
        .unwrap();
    let next = scheduler.push_cell(doc, CellKind::Code, "1 + 1").unwrap();

    scheduler.evaluate(doc, slow).unwrap();
    let running = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(slow).unwrap().status() == CellStatus::EvaluationInProgress
    });
    assert!(running);

    scheduler.stop_evaluation(doc, slow).unwrap();
    scheduler.evaluate(doc, next).unwrap();
    let done = scheduler.run_until(TIMEOUT, |s| {
        s.document(doc).unwrap().cell(next).unwrap().result().is_some()
    });
    assert!(done);
    assert_eq!(
        scheduler.document(doc).unwrap().cell(next).unwrap().result(),
        Some(&CellResult::Text("2".into()))
    );
}
