//! Notebook directory management.
//!
//! Provides the directory structure shared by the CLI and the scheduler:
//!
//! ```text
//! <root>/
//! ├── <document>/   # One directory per document; permanent asset directory
//! └── .quire/
//!     └── scratch/  # Per-query scratch directories created by engines
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure for a quire notebook.
#[derive(Debug, Clone)]
pub struct NotebookDirs {
    /// Root directory holding one subdirectory per document.
    pub root: PathBuf,

    /// The `.quire` directory for scheduler-owned files.
    pub quire_dir: PathBuf,

    /// Parent of all engine scratch directories.
    pub scratch_dir: PathBuf,
}

impl NotebookDirs {
    /// Create the directory structure under `root`.
    ///
    /// Creates all necessary directories if they don't exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let quire_dir = root.join(".quire");
        let scratch_dir = quire_dir.join("scratch");

        fs::create_dir_all(&scratch_dir)?;

        Ok(Self {
            root,
            quire_dir,
            scratch_dir,
        })
    }

    /// Default notebook root in the user's data directory.
    ///
    /// Falls back to `./quire` when no data directory is known.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("quire"))
            .unwrap_or_else(|| PathBuf::from("quire"))
    }

    /// Directory of the document called `name`.
    pub fn document_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whether `path` is a document directory (a visible subdirectory).
    pub fn is_document_dir(path: &Path) -> bool {
        path.is_dir()
            && path
                .file_name()
                .is_some_and(|name| !name.to_string_lossy().starts_with('.'))
    }

    /// Remove every leftover scratch directory.
    ///
    /// Scratch directories of a cleanly torn down engine are already gone;
    /// this handles the ones left behind by a crash.
    pub fn clean_scratch(&self) -> Result<()> {
        if self.scratch_dir.exists() {
            fs::remove_dir_all(&self.scratch_dir)?;
        }
        fs::create_dir_all(&self.scratch_dir)?;
        Ok(())
    }
}
