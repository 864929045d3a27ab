//! Cells and the cell state machine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::queue::QueryId;

use super::result::CellResult;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a cell.
///
/// Identifiers are never reused within a process, so a removed cell can
/// never be confused with a cell created later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId(pub(crate) u64);

impl CellId {
    /// Allocate a fresh identifier.
    pub(crate) fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell_{}", self.0)
    }
}

/// What a cell contains and which pipeline evaluates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    /// Source evaluated by the document's engine.
    Code,
    /// Markdown rendered by the shared markup pipeline.
    Markdown,
}

impl CellKind {
    /// Status a fresh cell of this kind starts in.
    pub fn initial_status(self) -> CellStatus {
        match self {
            Self::Code => CellStatus::Idle,
            Self::Markdown => CellStatus::Edit,
        }
    }

    /// Status a cell returns to when its evaluation ends or is stopped.
    ///
    /// Markdown cells go back to editing; `Display` is only entered once
    /// a rendered result is attached.
    pub fn stopped_status(self) -> CellStatus {
        self.initial_status()
    }
}

/// Status of a cell, as shown by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    /// Quiescent code cell.
    Idle,
    /// Quiescent markdown cell showing its source.
    Edit,
    /// Quiescent markdown cell showing its rendered result.
    Display,
    /// Evaluation requested, not yet queued.
    ReadyForEvaluation,
    /// Waiting in the evaluation queue.
    QueuedForEvaluation,
    /// Being evaluated by a worker.
    EvaluationInProgress,
    /// Transitional: any in-flight work for this cell is being cancelled.
    EvaluationToStop,
}

impl CellStatus {
    /// Whether the cell is at rest (not counted as busy).
    pub fn is_quiescent(self) -> bool {
        matches!(self, Self::Idle | Self::Edit | Self::Display)
    }

    /// Stable name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Edit => "edit",
            Self::Display => "display",
            Self::ReadyForEvaluation => "ready_for_evaluation",
            Self::QueuedForEvaluation => "queued_for_evaluation",
            Self::EvaluationInProgress => "evaluation_in_progress",
            Self::EvaluationToStop => "evaluation_to_stop",
        }
    }
}

impl std::fmt::Display for CellStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluable unit of input within a document.
///
/// A cell does not store its position; the owning document derives it from
/// the cell's index on demand.
#[derive(Debug)]
pub struct Cell {
    id: CellId,
    kind: CellKind,
    text: String,
    status: CellStatus,
    result: Option<CellResult>,
    /// Query whose events this cell still accepts.
    awaiting: Option<QueryId>,
    modified: bool,
}

impl Cell {
    pub(crate) fn new(kind: CellKind, text: impl Into<String>) -> Self {
        Self {
            id: CellId::next(),
            kind,
            text: text.into(),
            status: kind.initial_status(),
            result: None,
            awaiting: None,
            modified: false,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    pub fn result(&self) -> Option<&CellResult> {
        self.result.as_ref()
    }

    /// Whether the cell changed since the document was last saved.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Query the cell is waiting for, if any.
    pub fn awaiting(&self) -> Option<QueryId> {
        self.awaiting
    }

    /// Whether events of `query` may still change this cell.
    pub fn accepts(&self, query: QueryId) -> bool {
        self.awaiting == Some(query)
    }

    pub(crate) fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.modified = true;
    }

    pub(crate) fn set_status(&mut self, status: CellStatus) {
        self.status = status;
    }

    pub(crate) fn set_awaiting(&mut self, query: Option<QueryId>) {
        self.awaiting = query;
    }

    /// Replace the result, releasing the previous one's assets first.
    pub(crate) fn replace_result(&mut self, result: Option<CellResult>) {
        if let Some(old) = self.result.take() {
            if result.as_ref() != Some(&old) {
                old.release();
            }
        }
        self.result = result;
        self.modified = true;
    }

    /// Drop the result and its assets without marking the cell modified.
    pub(crate) fn release_result(&mut self) {
        if let Some(old) = self.result.take() {
            old.release();
        }
    }

    pub(crate) fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }
}
