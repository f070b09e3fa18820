//! Audio cleaning pipeline module
//!
//! Per-channel denoising chain:
//! 1. Noise reference extraction from a user-marked time window
//! 2. Spectral gating against that reference (STFT mask)
//! 3. Zero-phase Butterworth band-pass
//! 4. Output gain with hard clipping

pub mod filters;
pub mod gain;
pub mod noise_profile;
pub mod pipeline;
pub mod spectral;

pub use noise_profile::NoiseWindow;
pub use pipeline::{process_file, DenoiseParameters, FileReport};
