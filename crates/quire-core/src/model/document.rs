//! Documents: ordered cells plus the bookkeeping the scheduler drives.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{Change, Outbox, Source};

use super::cell::{Cell, CellId, CellKind, CellStatus};
use super::result::CellResult;

/// Identifier of a document: the smallest unused non-negative integer at
/// creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub(crate) usize);

impl DocumentId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "document_{}", self.0)
    }
}

/// Whether the document has unsaved changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Saved,
    Modified,
}

/// Lifecycle of the document's engine as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    None,
    Starting,
    Running,
}

/// A worksheet: an ordered list of cells backed by one engine.
///
/// All mutation happens on the consumer. Every mutating method records the
/// notifications it causes in the given [`Outbox`].
#[derive(Debug)]
pub struct Document {
    id: DocumentId,
    name: String,
    /// Permanent asset directory.
    path: PathBuf,
    cells: Vec<Cell>,
    active_cell: Option<CellId>,
    /// Cells that are not quiescent.
    busy: FxHashSet<CellId>,
    save_state: SaveState,
    kernel_state: KernelState,
    /// A kernel restart waits for the busy set to drain.
    restart_pending: bool,
}

impl Document {
    pub(crate) fn new(id: DocumentId, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            path: path.into(),
            cells: Vec::new(),
            active_cell: None,
            busy: FxHashSet::default(),
            save_state: SaveState::Saved,
            kernel_state: KernelState::None,
            restart_pending: false,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Permanent asset directory of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id() == id)
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.id() == id)
    }

    fn require_cell_mut(&mut self, id: CellId) -> Result<&mut Cell> {
        self.cell_mut(id).ok_or(Error::CellNotFound(id))
    }

    /// Position of a cell, derived from its index.
    pub fn position_of(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|c| c.id() == id)
    }

    pub fn next_cell(&self, id: CellId) -> Option<&Cell> {
        let position = self.position_of(id)?;
        self.cells.get(position + 1)
    }

    pub fn prev_cell(&self, id: CellId) -> Option<&Cell> {
        let position = self.position_of(id)?;
        position.checked_sub(1).and_then(|p| self.cells.get(p))
    }

    pub fn active_cell(&self) -> Option<CellId> {
        self.active_cell
    }

    pub fn busy_cell_count(&self) -> usize {
        self.busy.len()
    }

    pub fn save_state(&self) -> SaveState {
        self.save_state
    }

    pub fn kernel_state(&self) -> KernelState {
        self.kernel_state
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub(crate) fn set_restart_pending(&mut self, pending: bool) {
        self.restart_pending = pending;
    }

    fn source(&self) -> Source {
        Source::Document { document: self.id }
    }

    fn cell_source(&self, cell: CellId) -> Source {
        Source::Cell {
            document: self.id,
            cell,
        }
    }

    /// Insert a new cell at `position` (clamped to the end).
    pub(crate) fn create_cell(
        &mut self,
        position: usize,
        kind: CellKind,
        text: impl Into<String>,
        outbox: &mut Outbox,
    ) -> CellId {
        let position = position.min(self.cells.len());
        let cell = Cell::new(kind, text);
        let id = cell.id();
        self.cells.insert(position, cell);
        outbox.push(self.source(), Change::NewCell { cell: id, position });
        self.set_save_state(SaveState::Modified, outbox);
        id
    }

    /// Remove a cell and release its result.
    ///
    /// Callers stop in-flight work for the cell first.
    pub(crate) fn remove_cell(&mut self, id: CellId, outbox: &mut Outbox) -> Result<()> {
        let position = self.position_of(id).ok_or(Error::CellNotFound(id))?;
        let mut cell = self.cells.remove(position);
        cell.set_awaiting(None);
        cell.release_result();

        if self.busy.remove(&id) {
            outbox.push(
                self.source(),
                Change::BusyCellCountChanged {
                    count: self.busy.len(),
                },
            );
        }
        if self.active_cell == Some(id) || self.cells.is_empty() {
            self.active_cell = None;
        }

        outbox.push(self.source(), Change::DeletedCell { cell: id, position });
        self.set_save_state(SaveState::Modified, outbox);
        Ok(())
    }

    /// Move a cell to a new status and keep the busy set in sync.
    pub(crate) fn set_cell_status(
        &mut self,
        id: CellId,
        status: CellStatus,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let source = self.cell_source(id);
        let cell = self.require_cell_mut(id)?;
        if cell.status() == status {
            return Ok(());
        }
        tracing::debug!("{} {} -> {}", id, cell.status(), status);
        cell.set_status(status);
        outbox.push(source, Change::CellStateChange { status });

        let changed = if status.is_quiescent() {
            self.busy.remove(&id)
        } else {
            self.busy.insert(id)
        };
        if changed {
            outbox.push(
                self.source(),
                Change::BusyCellCountChanged {
                    count: self.busy.len(),
                },
            );
        }
        Ok(())
    }

    /// Attach (or clear) a cell's result.
    pub(crate) fn set_cell_result(
        &mut self,
        id: CellId,
        result: Option<CellResult>,
        show_animation: bool,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let source = self.cell_source(id);
        let cell = self.require_cell_mut(id)?;
        cell.replace_result(result.clone());
        outbox.push(
            source,
            Change::NewResult {
                result,
                show_animation,
            },
        );
        self.set_save_state(SaveState::Modified, outbox);
        Ok(())
    }

    pub(crate) fn set_cell_text(
        &mut self,
        id: CellId,
        text: impl Into<String>,
        outbox: &mut Outbox,
    ) -> Result<()> {
        self.require_cell_mut(id)?.set_text(text);
        self.set_save_state(SaveState::Modified, outbox);
        Ok(())
    }

    pub(crate) fn set_kernel_state(&mut self, state: KernelState, outbox: &mut Outbox) {
        tracing::debug!("{} kernel {:?}", self.id, state);
        self.kernel_state = state;
        outbox.push(self.source(), Change::KernelStateChanged { state });
    }

    pub(crate) fn set_save_state(&mut self, state: SaveState, outbox: &mut Outbox) {
        if self.save_state != state {
            self.save_state = state;
            outbox.push(self.source(), Change::SaveStateChange { state });
        }
        if state == SaveState::Saved {
            for cell in &mut self.cells {
                cell.set_modified(false);
            }
        }
    }

    /// Mark the document as persisted.
    pub(crate) fn mark_saved(&mut self, outbox: &mut Outbox) {
        self.set_save_state(SaveState::Saved, outbox);
    }

    pub(crate) fn set_active_cell(&mut self, id: CellId, outbox: &mut Outbox) -> Result<()> {
        if self.cell(id).is_none() {
            return Err(Error::CellNotFound(id));
        }
        if let Some(previous) = self.active_cell {
            outbox.push(self.source(), Change::NewInactiveCell { cell: previous });
        }
        self.active_cell = Some(id);
        outbox.push(self.source(), Change::NewActiveCell { cell: id });
        Ok(())
    }

    /// Swap the cells at `position` and `new_position`.
    pub(crate) fn move_cell(
        &mut self,
        position: usize,
        new_position: usize,
        outbox: &mut Outbox,
    ) -> Result<()> {
        if position.max(new_position) >= self.cells.len() {
            return Err(Error::InvalidOperation(format!(
                "cannot move cell {} to {} in a document with {} cells",
                position,
                new_position,
                self.cells.len()
            )));
        }
        self.cells.swap(position, new_position);
        outbox.push(
            self.source(),
            Change::CellMoved {
                position,
                new_position,
            },
        );
        self.set_save_state(SaveState::Modified, outbox);
        Ok(())
    }
}
