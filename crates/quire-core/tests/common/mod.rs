//! Shared helpers for scheduler integration tests.
//!
//! `ScriptedEngine` interprets a tiny command language instead of running a
//! real interpreter:
//!
//! - `block` waits until interrupted
//! - `sleep:<ms>` waits, returning early when interrupted
//! - `crash` behaves like an engine that died mid-query
//! - anything else echoes back as `out: <source>`

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use quire_core::{
    BasicMarkupRenderer, CellId, CellResult, CellStatus, Change, DocumentId, Engine,
    EngineFactory, EngineState, Error, InterruptHandle, Notification, NotebookDirs, ResultBlob,
    Result, Scheduler, SchedulerConfig, Source,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Counters shared by every engine a factory creates.
#[derive(Default)]
pub struct Script {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub interrupted: AtomicUsize,
    pub completed: AtomicUsize,
    pub fail_start: AtomicBool,
    pub executed: Mutex<Vec<String>>,
}

impl Script {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl EngineFactory for ScriptedFactory {
    fn create(&self, _document: DocumentId) -> Box<dyn Engine> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedEngine {
            script: self.script.clone(),
            state: EngineState::NotStarted,
            interrupt: InterruptHandle::new(),
        })
    }
}

pub struct ScriptedEngine {
    script: Arc<Script>,
    state: EngineState,
    interrupt: InterruptHandle,
}

impl ScriptedEngine {
    /// Wait up to `limit`. Returns false when interrupted.
    fn wait(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.interrupt.is_requested() {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        !self.interrupt.is_requested()
    }

    fn evaluate(&mut self, source: &str) -> Result<Option<ResultBlob>> {
        let finished = match source {
            "block" => self.wait(TIMEOUT),
            "crash" => {
                self.state = EngineState::Terminated;
                return Err(Error::EngineExited);
            }
            _ => match source.strip_prefix("sleep:") {
                Some(ms) => self.wait(Duration::from_millis(ms.parse().unwrap_or(0))),
                None => !self.interrupt.is_requested(),
            },
        };
        if !finished {
            self.script.interrupted.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }
        Ok(Some(ResultBlob {
            text: format!("out: {}", source),
            files: Vec::new(),
            path: std::env::temp_dir(),
        }))
    }
}

impl Engine for ScriptedEngine {
    fn state(&self) -> EngineState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        match self.state {
            EngineState::Started => Ok(()),
            EngineState::Terminated => Err(Error::Terminated),
            EngineState::NotStarted => {
                if self.script.fail_start.load(Ordering::SeqCst) {
                    return Err(Error::Spawn {
                        program: "scripted".to_string(),
                        message: "refused".to_string(),
                    });
                }
                self.script.started.fetch_add(1, Ordering::SeqCst);
                self.state = EngineState::Started;
                Ok(())
            }
        }
    }

    fn run(&mut self, source: &str) -> Result<Option<ResultBlob>> {
        self.start()?;
        self.script.executed.lock().push(source.to_string());
        let running = self.script.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.max_running.fetch_max(running, Ordering::SeqCst);

        let result = self.evaluate(source);

        self.script.running.fetch_sub(1, Ordering::SeqCst);
        self.script.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn teardown(&mut self) {
        self.state = EngineState::Terminated;
    }
}

/// Notifications recorded by a subscriber.
pub type Seen = Rc<RefCell<Vec<Notification>>>;

pub struct Harness {
    pub scheduler: Scheduler,
    pub script: Arc<Script>,
    pub seen: Seen,
    pub temp: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let script = Arc::new(Script::default());
        let config = SchedulerConfig {
            poll_interval_ms: 5,
            worker_poll_interval_ms: 5,
            ..SchedulerConfig::default()
        };
        let dirs = NotebookDirs::new(temp.path()).unwrap();
        let mut scheduler = Scheduler::with_parts(
            config,
            dirs,
            Arc::new(ScriptedFactory {
                script: script.clone(),
            }),
            Box::new(BasicMarkupRenderer),
        )
        .unwrap();

        let seen: Seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        scheduler.subscribe(move |n| sink.borrow_mut().push(n.clone()));

        Self {
            scheduler,
            script,
            seen,
            temp,
        }
    }

    pub fn status(&self, document: DocumentId, cell: CellId) -> CellStatus {
        self.scheduler
            .document(document)
            .unwrap()
            .cell(cell)
            .unwrap()
            .status()
    }

    pub fn result(&self, document: DocumentId, cell: CellId) -> Option<CellResult> {
        self.scheduler
            .document(document)
            .unwrap()
            .cell(cell)
            .unwrap()
            .result()
            .cloned()
    }

    /// Poll until the cell reaches `status`.
    pub fn wait_status(&mut self, document: DocumentId, cell: CellId, status: CellStatus) {
        let reached = self.scheduler.run_until(TIMEOUT, |s| {
            s.document(document)
                .ok()
                .and_then(|d| d.cell(cell))
                .is_some_and(|c| c.status() == status)
        });
        assert!(reached, "{} never reached {}", cell, status);
    }

    /// Poll until the engines ran `count` queries to completion.
    pub fn wait_completed(&mut self, count: usize) {
        let script = self.script.clone();
        let reached = self
            .scheduler
            .run_until(TIMEOUT, |_| Script::count(&script.completed) >= count);
        assert!(reached, "engines completed fewer than {} queries", count);
    }

    /// Keep polling for a while so late events get applied.
    pub fn settle(&mut self) {
        self.scheduler.run_until(Duration::from_millis(100), |_| false);
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }

    /// Status changes recorded for `cell`.
    pub fn statuses(&self, cell: CellId) -> Vec<CellStatus> {
        self.seen
            .borrow()
            .iter()
            .filter_map(|n| match (&n.source, &n.change) {
                (Source::Cell { cell: c, .. }, Change::CellStateChange { status }) if *c == cell => {
                    Some(*status)
                }
                _ => None,
            })
            .collect()
    }

    /// Results recorded for `cell`.
    pub fn results(&self, cell: CellId) -> Vec<Option<CellResult>> {
        self.seen
            .borrow()
            .iter()
            .filter_map(|n| match (&n.source, &n.change) {
                (Source::Cell { cell: c, .. }, Change::NewResult { result, .. }) if *c == cell => {
                    Some(result.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.seen.borrow().iter().map(|n| n.code()).collect()
    }
}
