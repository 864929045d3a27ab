//! Turning a raw result blob into a cell result.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::engine::ResultBlob;
use crate::model::CellResult;

/// Interpret the outcome of a code query.
///
/// The highest-numbered generated image wins and is moved into `asset_dir`
/// under a fresh `result<N>` name. Without an image, non-empty text becomes
/// the result. When promoting the image fails the text is used instead.
pub fn interpret(blob: &ResultBlob, config: &EngineConfig, asset_dir: &Path) -> Option<CellResult> {
    let image = blob
        .files
        .iter()
        .filter_map(|name| config.image_index(name).map(|index| (index, name)))
        .max_by_key(|(index, _)| *index);

    if let Some((_, name)) = image {
        let source = blob.path.join(name);
        match promote(&source, asset_dir, &config.image_extension) {
            Ok(target) => {
                tracing::debug!("Promoted {} to {}", source.display(), target.display());
                return Some(CellResult::ImageAsset(target));
            }
            Err(e) => tracing::warn!("Failed to store image {}: {}", source.display(), e),
        }
    }

    CellResult::text(&blob.text)
}

/// Move `source` into `asset_dir` as `result<N>.<extension>` with the
/// smallest unused N.
fn promote(source: &Path, asset_dir: &Path, extension: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(asset_dir)?;
    let target = unused_name(asset_dir, extension);

    if fs::rename(source, &target).is_err() {
        // Scratch and asset directories may live on different filesystems.
        fs::copy(source, &target)?;
        if let Err(e) = fs::remove_file(source) {
            tracing::debug!("Failed to remove {}: {}", source.display(), e);
        }
    }
    Ok(target)
}

fn unused_name(asset_dir: &Path, extension: &str) -> PathBuf {
    let mut count = 0u64;
    loop {
        let candidate = asset_dir.join(format!("result{}.{}", count, extension));
        if !candidate.exists() {
            return candidate;
        }
        count += 1;
    }
}
