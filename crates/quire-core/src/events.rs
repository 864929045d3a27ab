//! Events and notifications.
//!
//! Two kinds of messages flow through the scheduler:
//!
//! - [`Event`]s are produced by worker loops (and by the scheduler itself)
//!   and travel over a thread-safe channel to the single consumer.
//! - [`Notification`]s are produced by the consumer after it applied an
//!   event to the model, and are handed to every registered subscriber.
//!
//! ```text
//! worker loop ──Event──► channel ──► Scheduler::poll ──► model
//!                                                        │
//!                                     subscribers ◄──Notification
//! ```

use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::model::{CellId, CellKind, CellResult, CellStatus, DocumentId, KernelState, SaveState};
use crate::queue::QueryId;

/// Identity of one enqueued query, carried by every query-related event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTicket {
    pub id: QueryId,
    pub document: DocumentId,
    pub cell: CellId,
    pub kind: CellKind,
}

/// Message from a worker loop (or a stop request) to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A query entered a queue.
    QueryQueued { ticket: QueryTicket },

    /// A worker picked a query for execution.
    EvaluationStarted { ticket: QueryTicket },

    /// Work for a cell was cancelled (or there was none to cancel).
    CellEvaluationStopped { document: DocumentId, cell: CellId },

    /// A worker finished a query. `result` is `None` for empty output and
    /// for every failure.
    EvaluationFinished {
        ticket: QueryTicket,
        result: Option<CellResult>,
    },

    /// The engine of a document is up.
    KernelStarted { document: DocumentId },

    /// The engine of a document must be replaced.
    KernelToRestart { document: DocumentId },

    /// The engine of a document could not be started.
    KernelStartFailed { document: DocumentId, message: String },
}

impl Event {
    /// Stable name of the event.
    pub fn code(&self) -> &'static str {
        match self {
            Self::QueryQueued { .. } => "query_queued",
            Self::EvaluationStarted { .. } => "evaluation_started",
            Self::CellEvaluationStopped { .. } => "cell_evaluation_stopped",
            Self::EvaluationFinished { .. } => "evaluation_finished",
            Self::KernelStarted { .. } => "kernel_started",
            Self::KernelToRestart { .. } => "kernel_to_restart",
            Self::KernelStartFailed { .. } => "kernel_start_failed",
        }
    }

    /// Document the event targets.
    pub fn document(&self) -> DocumentId {
        match self {
            Self::QueryQueued { ticket }
            | Self::EvaluationStarted { ticket }
            | Self::EvaluationFinished { ticket, .. } => ticket.document,
            Self::CellEvaluationStopped { document, .. }
            | Self::KernelStarted { document }
            | Self::KernelToRestart { document }
            | Self::KernelStartFailed { document, .. } => *document,
        }
    }
}

/// Sending half of the event channel. Cheap to clone, usable from any thread.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Create a channel, returning the sender and the consumer's receiver.
    pub fn channel() -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Send an event. A consumer that went away is not an error for workers.
    pub fn send(&self, event: Event) {
        tracing::trace!("event {}", event.code());
        if self.tx.send(event).is_err() {
            tracing::debug!("Event consumer is gone, dropping event");
        }
    }
}

/// Entity a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Notebook,
    Document { document: DocumentId },
    Cell { document: DocumentId, cell: CellId },
}

/// State change reported to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    NewDocument { document: DocumentId },
    DocumentRemoved { document: DocumentId },
    ChangedActiveDocument { document: DocumentId },
    NewCell { cell: CellId, position: usize },
    DeletedCell { cell: CellId, position: usize },
    CellMoved { position: usize, new_position: usize },
    NewActiveCell { cell: CellId },
    NewInactiveCell { cell: CellId },
    CellStateChange { status: CellStatus },
    NewResult {
        result: Option<CellResult>,
        show_animation: bool,
    },
    BusyCellCountChanged { count: usize },
    KernelStateChanged { state: KernelState },
    SaveStateChange { state: SaveState },
}

impl Change {
    /// Stable change code, as consumed by UI controllers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NewDocument { .. } => "new_worksheet",
            Self::DocumentRemoved { .. } => "worksheet_removed",
            Self::ChangedActiveDocument { .. } => "changed_active_worksheet",
            Self::NewCell { .. } => "new_cell",
            Self::DeletedCell { .. } => "deleted_cell",
            Self::CellMoved { .. } => "cell_moved",
            Self::NewActiveCell { .. } => "new_active_cell",
            Self::NewInactiveCell { .. } => "new_inactive_cell",
            Self::CellStateChange { .. } => "cell_state_change",
            Self::NewResult { .. } => "new_result",
            Self::BusyCellCountChanged { .. } => "busy_cell_count_changed",
            Self::KernelStateChanged { .. } => "kernel_state_changed",
            Self::SaveStateChange { .. } => "save_state_change",
        }
    }
}

/// A `(change_code, source_entity, payload)` triple for subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub source: Source,
    pub change: Change,
}

impl Notification {
    pub fn code(&self) -> &'static str {
        self.change.code()
    }
}

/// Notifications produced by one model mutation, waiting to be fanned out.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, source: Source, change: Change) {
        self.pending.push(Notification { source, change });
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn take(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_codes() {
        let event = Event::CellEvaluationStopped {
            document: DocumentId(0),
            cell: CellId(3),
        };
        assert_eq!(event.code(), "cell_evaluation_stopped");
        assert_eq!(event.document(), DocumentId(0));
    }

    #[test]
    fn test_sender_survives_dropped_consumer() {
        let (tx, rx) = EventSender::channel();
        drop(rx);
        tx.send(Event::KernelStarted {
            document: DocumentId(1),
        });
    }

    #[test]
    fn test_outbox_take_empties() {
        let mut outbox = Outbox::new();
        outbox.push(
            Source::Document {
                document: DocumentId(0),
            },
            Change::BusyCellCountChanged { count: 1 },
        );
        assert!(!outbox.is_empty());

        let taken = outbox.take();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].code(), "busy_cell_count_changed");
        assert!(outbox.is_empty());
    }
}
