//! The notebook: registry of all documents.

use std::collections::BTreeMap;
use std::fs;

use crate::error::{Error, Result};
use crate::events::{Change, Outbox, Source};
use crate::paths::NotebookDirs;

use super::document::{Document, DocumentId, SaveState};

/// Base name of documents created without a name.
pub const UNTITLED: &str = "Untitled";

/// All documents of one notebook directory.
#[derive(Debug)]
pub struct Notebook {
    dirs: NotebookDirs,
    documents: BTreeMap<DocumentId, Document>,
    active: Option<DocumentId>,
}

impl Notebook {
    pub fn new(dirs: NotebookDirs) -> Self {
        Self {
            dirs,
            documents: BTreeMap::new(),
            active: None,
        }
    }

    pub fn dirs(&self) -> &NotebookDirs {
        &self.dirs
    }

    /// Register every document directory found under the notebook root.
    ///
    /// Directories are visited in name order so ids are reproducible.
    pub(crate) fn populate_from_path(&mut self, outbox: &mut Outbox) -> Result<Vec<DocumentId>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dirs.root)? {
            let path = entry?.path();
            if NotebookDirs::is_document_dir(&path)
                && let Some(name) = path.file_name()
            {
                names.push(name.to_string_lossy().to_string());
            }
        }
        names.sort();

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.create_document(&name, outbox)?);
        }
        tracing::info!("Found {} documents in {}", ids.len(), self.dirs.root.display());
        Ok(ids)
    }

    /// Create a document (and its asset directory) with the smallest free id.
    pub(crate) fn create_document(&mut self, name: &str, outbox: &mut Outbox) -> Result<DocumentId> {
        if name.is_empty() || name.starts_with('.') || name.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::InvalidOperation(format!(
                "invalid document name '{}'",
                name
            )));
        }
        let path = self.dirs.document_dir(name);
        fs::create_dir_all(&path)?;

        let id = self.find_unused_id();
        self.documents.insert(id, Document::new(id, name, path));
        outbox.push(Source::Notebook, Change::NewDocument { document: id });
        Ok(id)
    }

    /// Smallest non-negative integer not used as a document id.
    pub fn find_unused_id(&self) -> DocumentId {
        let mut count = 0;
        while self.documents.contains_key(&DocumentId(count)) {
            count += 1;
        }
        DocumentId(count)
    }

    /// Remove a document from the registry. Its directory stays on disk.
    pub(crate) fn remove_document(&mut self, id: DocumentId, outbox: &mut Outbox) -> Result<Document> {
        let document = self
            .documents
            .remove(&id)
            .ok_or(Error::DocumentNotFound(id))?;
        if self.active == Some(id) {
            self.active = None;
        }
        outbox.push(Source::Notebook, Change::DocumentRemoved { document: id });
        Ok(document)
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub(crate) fn document_mut(&mut self, id: DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(&id)
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    /// All documents called `name`.
    pub fn get_by_name(&self, name: &str) -> Vec<&Document> {
        self.documents.values().filter(|d| d.name() == name).collect()
    }

    /// Documents with unsaved changes.
    pub fn unsaved_documents(&self) -> Vec<&Document> {
        self.documents
            .values()
            .filter(|d| d.save_state() == SaveState::Modified)
            .collect()
    }

    /// Postfix that makes `Untitled<postfix>` an unused document name.
    ///
    /// Empty while no document is called `Untitled`, then `1`, `2`, ...
    pub fn untitled_postfix(&self) -> String {
        if self.get_by_name(UNTITLED).is_empty() {
            return String::new();
        }
        let mut count = 1;
        while !self.get_by_name(&format!("{}{}", UNTITLED, count)).is_empty() {
            count += 1;
        }
        count.to_string()
    }

    pub fn active_document(&self) -> Option<DocumentId> {
        self.active
    }

    pub(crate) fn set_active_document(&mut self, id: DocumentId, outbox: &mut Outbox) -> Result<()> {
        if !self.documents.contains_key(&id) {
            return Err(Error::DocumentNotFound(id));
        }
        self.active = Some(id);
        outbox.push(Source::Notebook, Change::ChangedActiveDocument { document: id });
        Ok(())
    }
}
