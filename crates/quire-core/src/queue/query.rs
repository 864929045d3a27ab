//! Evaluation requests.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::events::QueryTicket;
use crate::model::{CellId, CellKind, DocumentId};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub(crate) u64);

impl QueryId {
    fn next() -> Self {
        Self(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query_{}", self.0)
    }
}

/// One submitted evaluation request.
///
/// Immutable once enqueued; consumed exactly once, either executed or
/// dropped as stale.
#[derive(Debug, Clone)]
pub struct Query {
    id: QueryId,
    document: DocumentId,
    cell: CellId,
    kind: CellKind,
    /// Snapshot of the cell text at submission.
    source: String,
    /// Cancellation stamp, assigned by the queue.
    pub(crate) stamp: u64,
}

impl Query {
    pub fn new(document: DocumentId, cell: CellId, kind: CellKind, source: impl Into<String>) -> Self {
        Self {
            id: QueryId::next(),
            document,
            cell,
            kind,
            source: source.into(),
            stamp: 0,
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn kind(&self) -> CellKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    pub fn ticket(&self) -> QueryTicket {
        QueryTicket {
            id: self.id,
            document: self.document,
            cell: self.cell,
            kind: self.kind,
        }
    }
}
