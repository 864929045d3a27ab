//! Cell results.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Interpreted result of one evaluation.
///
/// A cell holds at most one of these. Image assets are files owned by the
/// result: call [`CellResult::release`] before dropping a replaced result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellResult {
    /// Text printed by the engine.
    Text(String),

    /// Generated image, stored in the document's asset directory.
    ImageAsset(PathBuf),

    /// Rendered markup of a markdown cell.
    Markup(String),
}

impl CellResult {
    /// Text result with trailing whitespace removed, or `None` when empty.
    pub fn text(text: &str) -> Option<Self> {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self::Text(trimmed.to_string()))
        }
    }

    /// Path of the owned asset file, if any.
    pub fn asset_path(&self) -> Option<&Path> {
        match self {
            Self::ImageAsset(path) => Some(path),
            Self::Text(_) | Self::Markup(_) => None,
        }
    }

    /// Delete the asset file owned by this result.
    ///
    /// A missing file is not an error.
    pub fn release(&self) {
        let Some(path) = self.asset_path() else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!("Released asset {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to release asset {}: {}", path.display(), e),
        }
    }

    /// Raw text form used by the persistence layer.
    ///
    /// Image assets are written as `<image>file name</image>`.
    pub fn raw_text(&self) -> String {
        match self {
            Self::Text(text) | Self::Markup(text) => text.clone(),
            Self::ImageAsset(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                format!("<image>{}</image>", name)
            }
        }
    }

    /// Parse the raw text form of a code cell result.
    ///
    /// Image references are resolved against `asset_dir`.
    pub fn from_raw_text(raw: &str, asset_dir: &Path) -> Option<Self> {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("<image>") {
            let name = rest.split('<').next().unwrap_or_default();
            if !name.is_empty() {
                return Some(Self::ImageAsset(asset_dir.join(name)));
            }
        }
        Self::text(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_trims_and_rejects_empty() {
        assert_eq!(CellResult::text("2\n\n"), Some(CellResult::Text("2".into())));
        assert_eq!(CellResult::text("  \n"), None);
    }

    #[test]
    fn test_raw_text_round_trip_for_images() {
        let dir = Path::new("/notebook/algebra");
        let result = CellResult::ImageAsset(dir.join("result3.png"));
        assert_eq!(result.raw_text(), "<image>result3.png</image>");
        assert_eq!(CellResult::from_raw_text(&result.raw_text(), dir), Some(result));
    }

    #[test]
    fn test_release_deletes_asset() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("result0.png");
        std::fs::write(&path, b"png").unwrap();

        let result = CellResult::ImageAsset(path.clone());
        result.release();
        assert!(!path.exists());

        // Releasing twice is harmless.
        result.release();
    }

    #[test]
    fn test_release_keeps_text() {
        CellResult::Text("x".into()).release();
    }
}
