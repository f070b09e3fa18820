use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::audio_util::AudioFormat;
use crate::error::{DenoiseError, Result};

/// Recursively collect supported audio files under `root`.
///
/// Entries are visited sorted by file name within each directory so the
/// batch order is stable across platforms. Unreadable entries are skipped.
pub fn discover_audio_files(root: impl AsRef<Path>) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| AudioFormat::from_path(e.path()).is_some())
        .map(|e| e.into_path())
        .collect()
}

/// Same relative path as `source` under `input_root`, re-rooted at `output_root`
pub fn mirrored_destination(input_root: &Path, output_root: &Path, source: &Path) -> Result<PathBuf> {
    let relative = source.strip_prefix(input_root).map_err(|_| {
        DenoiseError::Configuration(format!(
            "{:?} is not inside input root {:?}",
            source, input_root
        ))
    })?;
    Ok(output_root.join(relative))
}

/// Mirrored destination with its parent directories created
pub fn prepare_destination(input_root: &Path, output_root: &Path, source: &Path) -> Result<PathBuf> {
    let destination = mirrored_destination(input_root, output_root, source)?;
    if let Some(parent) = destination.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            log::debug!("Created output directory: {:?}", parent);
        }
    }
    Ok(destination)
}
