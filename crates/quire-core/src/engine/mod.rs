//! Interactive computation engines.
//!
//! Each document is backed by one engine: a long-running interpreter that
//! keeps state between queries. [`EngineProcess`] is the subprocess
//! implementation; the [`Engine`] trait lets the pool hold any engine, which
//! is also how tests substitute scripted engines.

mod interrupt;
mod pool;
mod process;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::DocumentId;

pub use interrupt::InterruptHandle;
pub use pool::{EngineProcessPool, EngineSlot};
pub use process::EngineProcess;

/// Lifecycle of an engine. `Terminated` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    NotStarted,
    Started,
    Terminated,
}

/// Raw outcome of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBlob {
    /// Text printed between sending the query and the next prompt.
    pub text: String,
    /// Names of the files the query wrote into its scratch directory.
    pub files: Vec<String>,
    /// The query's scratch directory.
    pub path: PathBuf,
}

/// A stateful evaluator bound to a single document.
///
/// At most one `run` is in flight per engine; the evaluation queue of the
/// document guarantees it.
pub trait Engine: Send {
    fn state(&self) -> EngineState;

    /// Spawn and initialize. No-op when already started.
    fn start(&mut self) -> Result<()>;

    /// Evaluate `source`, starting the engine first if needed.
    ///
    /// Returns `Ok(None)` when the query was interrupted; the output up to
    /// the next prompt is discarded.
    fn run(&mut self, source: &str) -> Result<Option<ResultBlob>>;

    /// Handle that interrupts a running `run` from another thread.
    fn interrupt_handle(&self) -> InterruptHandle;

    /// Interrupt the running query. A no-op while idle.
    fn interrupt(&self) -> bool {
        self.interrupt_handle().interrupt()
    }

    /// Purge scratch directories and terminate the engine.
    fn teardown(&mut self);
}

/// Creates the engine for a document.
pub trait EngineFactory: Send + Sync {
    fn create(&self, document: DocumentId) -> Box<dyn Engine>;
}

/// Factory for [`EngineProcess`] engines sharing one configuration.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    config: EngineConfig,
    scratch_root: PathBuf,
}

impl ProcessEngineFactory {
    pub fn new(config: EngineConfig, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            scratch_root: scratch_root.into(),
        }
    }
}

impl EngineFactory for ProcessEngineFactory {
    fn create(&self, document: DocumentId) -> Box<dyn Engine> {
        tracing::debug!("Creating engine for {}", document);
        Box::new(EngineProcess::new(
            self.config.clone(),
            self.scratch_root.clone(),
        ))
    }
}
