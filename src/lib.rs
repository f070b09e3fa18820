//! Batch audio denoising
//!
//! Walks a directory of recordings, removes stationary background noise
//! using a user-marked noise-only stretch, band-limits and boosts each
//! channel, then writes the result into a mirrored output tree.

pub mod audio_clean;
pub mod audio_util;
pub mod commands;
pub mod error;
pub mod services;

pub use audio_clean::{DenoiseParameters, NoiseWindow};
pub use commands::denoise::{BatchConfig, BatchController, BatchState, BatchSummary};
pub use commands::events::ProcessingEvent;
pub use error::{DenoiseError, Result};
