//! Core of the quire worksheet environment.
//!
//! This crate provides:
//! - Worksheet model (notebook, documents, cells, results)
//! - Long-running engine subprocesses with interrupt support
//! - Per-document evaluation queues with cooperative cancellation
//! - The scheduler that applies worker events and notifies subscribers

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod markdown;
pub mod model;
pub mod paths;
pub mod queue;
pub mod scheduler;

pub use config::{EngineConfig, SchedulerConfig};
pub use engine::{Engine, EngineFactory, EngineState, InterruptHandle, ResultBlob};
pub use error::{Error, Result};
pub use events::{Change, Event, Notification, QueryTicket, Source};
pub use markdown::{BasicMarkupRenderer, MarkupRenderer};
pub use model::{
    Cell, CellId, CellKind, CellResult, CellStatus, Document, DocumentId, KernelState, Notebook,
    SaveState, UNTITLED,
};
pub use paths::NotebookDirs;
pub use queue::QueryId;
pub use scheduler::{Scheduler, Subscriber};
