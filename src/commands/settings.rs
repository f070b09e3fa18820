//! Settings file
//!
//! Reads and writes the batch configuration as pretty-printed JSON.

use std::fs;
use std::path::Path;

use super::denoise::BatchConfig;
use crate::error::{DenoiseError, Result};

/// Looked up in the working directory when no path is given
pub const DEFAULT_SETTINGS_FILE: &str = "batch-denoiser.json";

/// Load settings from `path`.
///
/// A missing or unparsable file yields the defaults. Fields absent from the
/// file take their default values.
pub fn load_settings(path: &Path) -> BatchConfig {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<BatchConfig>(&content) {
            Ok(settings) => {
                log::debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                log::warn!("Failed to parse settings, using defaults: {}", e);
                BatchConfig::default()
            }
        },
        Err(_) => BatchConfig::default(),
    }
}

/// Save settings to `path`, creating parent directories
pub fn save_settings(path: &Path, settings: &BatchConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = serde_json::to_string_pretty(settings)
        .map_err(|e| DenoiseError::Configuration(format!("Failed to serialize settings: {}", e)))?;
    fs::write(path, content)?;
    log::info!("Settings saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_clean::DenoiseParameters;
    use std::path::PathBuf;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json"));
        assert_eq!(settings, BatchConfig::default());
        assert_eq!(settings.noise_start_ms, 0.0);
        assert_eq!(settings.noise_end_ms, 1000.0);
        assert_eq!(settings.params, DenoiseParameters::default());
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), BatchConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.json");
        let settings = BatchConfig {
            input_root: PathBuf::from("/audio/raw"),
            output_root: PathBuf::from("/audio/clean"),
            noise_start_ms: 250.0,
            noise_end_ms: 750.0,
            params: DenoiseParameters {
                gain_db: 0.0,
                preserve_high_bit_depth: false,
                filter_order: 4,
                ..DenoiseParameters::default()
            },
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"inputRoot": "in", "params": {"gainDb": 6.0, "propDecrease": 0.8}}"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.input_root, PathBuf::from("in"));
        assert_eq!(settings.output_root, PathBuf::new());
        assert_eq!(settings.noise_end_ms, 1000.0);
        assert_eq!(settings.params.gain_db, 6.0);
        assert_eq!(settings.params.prop_decrease, 0.8);
        assert_eq!(settings.params.fft_size, 2048);
    }
}
