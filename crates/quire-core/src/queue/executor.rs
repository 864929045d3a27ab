//! What a worker loop does with a query.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::{EngineProcessPool, EngineState};
use crate::error::Error;
use crate::events::{Event, EventSender, QueryTicket};
use crate::markdown::MarkupRenderer;
use crate::model::{CellResult, DocumentId};

use super::interpret::interpret;
use super::query::Query;

/// Executes queries for one evaluation queue.
///
/// Implementations never fail: every error becomes a `None` result, since
/// the consumer only ever receives data.
pub trait QueryExecutor: Send + Sync {
    /// Called under the queue lock when `ticket` becomes the active query.
    fn arm(&self, _ticket: &QueryTicket) {}

    /// Run `query` to completion. This is the only blocking step of a worker.
    fn execute(&self, query: &Query) -> Option<CellResult>;

    /// Interrupt the active query. Returns whether anything was interrupted.
    fn interrupt(&self, ticket: &QueryTicket) -> bool;
}

/// Runs code queries of one document on its engine.
pub struct EngineExecutor {
    document: DocumentId,
    pool: Arc<EngineProcessPool>,
    config: EngineConfig,
    /// Permanent asset directory of the document.
    asset_dir: PathBuf,
    events: EventSender,
}

impl EngineExecutor {
    pub fn new(
        document: DocumentId,
        pool: Arc<EngineProcessPool>,
        config: EngineConfig,
        asset_dir: impl Into<PathBuf>,
        events: EventSender,
    ) -> Self {
        Self {
            document,
            pool,
            config,
            asset_dir: asset_dir.into(),
            events,
        }
    }
}

impl QueryExecutor for EngineExecutor {
    fn arm(&self, _ticket: &QueryTicket) {
        self.pool
            .get_or_create(self.document)
            .interrupt_handle()
            .arm();
    }

    fn execute(&self, query: &Query) -> Option<CellResult> {
        let mut slot = self.pool.get_or_create(self.document);
        let mut engine = slot.engine().lock();
        if engine.state() == EngineState::Terminated {
            // Torn down by a restart while we waited for the lock.
            drop(engine);
            slot = self.pool.get_or_create(self.document);
            engine = slot.engine().lock();
        }

        if engine.state() != EngineState::Started {
            match engine.start() {
                Ok(()) => {
                    tracing::info!("Engine of {} started", self.document);
                    self.events.send(Event::KernelStarted {
                        document: self.document,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to start engine of {}: {}", self.document, e);
                    self.events.send(Event::KernelStartFailed {
                        document: self.document,
                        message: e.to_string(),
                    });
                    return None;
                }
            }
        }

        match engine.run(query.source()) {
            Ok(Some(blob)) => interpret(&blob, &self.config, &self.asset_dir),
            Ok(None) => {
                tracing::debug!("{} was interrupted", query.id());
                None
            }
            Err(e) => {
                tracing::warn!("Query {} on {} failed: {}", query.id(), self.document, e);
                if matches!(e, Error::EngineExited | Error::EngineTimeout(_)) {
                    self.events.send(Event::KernelToRestart {
                        document: self.document,
                    });
                }
                None
            }
        }
    }

    fn interrupt(&self, _ticket: &QueryTicket) -> bool {
        self.pool.interrupt(self.document)
    }
}

/// Renders markdown queries of every document.
pub struct MarkdownExecutor {
    renderer: Box<dyn MarkupRenderer>,
}

impl MarkdownExecutor {
    pub fn new(renderer: Box<dyn MarkupRenderer>) -> Self {
        Self { renderer }
    }
}

impl QueryExecutor for MarkdownExecutor {
    fn execute(&self, query: &Query) -> Option<CellResult> {
        let markup = self.renderer.render(query.source());
        if markup.trim().is_empty() {
            None
        } else {
            Some(CellResult::Markup(markup))
        }
    }

    fn interrupt(&self, _ticket: &QueryTicket) -> bool {
        // Rendering is synchronous; a stopped query's result is discarded.
        false
    }
}
