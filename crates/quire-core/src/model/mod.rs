//! Worksheet model: notebook, documents, cells and results.
//!
//! The model is only mutated by the scheduler's consumer. Worker threads
//! never touch it; they describe what happened through events.

mod cell;
mod document;
mod notebook;
mod result;

pub use cell::{Cell, CellId, CellKind, CellStatus};
pub use document::{Document, DocumentId, KernelState, SaveState};
pub use notebook::{Notebook, UNTITLED};
pub use result::CellResult;
