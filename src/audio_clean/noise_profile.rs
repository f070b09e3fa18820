//! Noise reference extraction
//!
//! The user marks a stretch of the recording (in milliseconds) that contains
//! only background noise. The same window is applied to every file, so it is
//! converted to sample indices per file using that file's own sample rate.

use serde::{Deserialize, Serialize};

use crate::error::{DenoiseError, Result};

/// Noise reference window in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseWindow {
    pub start_ms: f64,
    pub end_ms: f64,
}

impl NoiseWindow {
    pub fn new(start_ms: f64, end_ms: f64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Convert to `[start, end)` sample indices for a channel of `length` samples.
    pub fn to_sample_range(&self, sample_rate: u32, length: usize) -> Result<(usize, usize)> {
        let start_idx = ms_to_index(self.start_ms, sample_rate);
        let end_idx = ms_to_index(self.end_ms, sample_rate);

        if end_idx <= start_idx || end_idx > length {
            return Err(DenoiseError::InvalidWindow(format!(
                "{}-{} ms maps to samples {}..{} but the file has {} samples",
                self.start_ms, self.end_ms, start_idx, end_idx, length
            )));
        }

        Ok((start_idx, end_idx))
    }
}

impl Default for NoiseWindow {
    fn default() -> Self {
        Self {
            start_ms: 0.0,
            end_ms: 1000.0,
        }
    }
}

fn ms_to_index(time_ms: f64, sample_rate: u32) -> usize {
    // Negative and NaN saturate to 0
    (time_ms * sample_rate as f64 / 1000.0) as usize
}

/// Borrow the noise reference slice `[start_idx, end_idx)` of a channel
pub fn extract_noise_reference(channel: &[f32], start_idx: usize, end_idx: usize) -> Result<&[f32]> {
    if end_idx <= start_idx || end_idx > channel.len() {
        return Err(DenoiseError::InvalidWindow(format!(
            "samples {}..{} outside channel of {} samples",
            start_idx,
            end_idx,
            channel.len()
        )));
    }
    Ok(&channel[start_idx..end_idx])
}
