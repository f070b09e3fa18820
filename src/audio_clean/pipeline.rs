//! Per-file denoising chain
//!
//! Decode → (per channel) noise reference → spectral gate → band-pass →
//! gain → encode. Channels are processed independently and written back in
//! their original order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::filters::BandpassFilter;
use super::gain::apply_gain;
use super::noise_profile::{extract_noise_reference, NoiseWindow};
use super::spectral::{self, SpectralDenoiser};
use crate::audio_util::{self, AudioBuffer, SampleWidth};
use crate::error::{DenoiseError, Result};

/// Parameters for every stage of the chain, fixed for a whole batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DenoiseParameters {
    /// Noise reduction strength (0.0 - 1.0)
    pub prop_decrease: f32,
    /// FFT size (n_fft)
    pub fft_size: usize,
    /// Analysis window length, typically equal to `fft_size`
    pub window_length: usize,
    /// Hop length, commonly `fft_size / 4`
    pub hop_length: usize,
    /// Band-pass low corner (Hz)
    pub filter_low_hz: f32,
    /// Band-pass high corner (Hz)
    pub filter_high_hz: f32,
    /// Butterworth order, typically 4-8
    pub filter_order: usize,
    /// Output gain in dB (0-15)
    pub gain_db: f32,
    /// Write 32-bit instead of 16-bit PCM
    pub preserve_high_bit_depth: bool,
}

impl Default for DenoiseParameters {
    fn default() -> Self {
        Self {
            prop_decrease: 1.0,
            fft_size: 2048,
            window_length: 2048,
            hop_length: 512,
            filter_low_hz: 80.0,
            filter_high_hz: 16000.0,
            filter_order: 6,
            gain_db: 3.0,
            preserve_high_bit_depth: true,
        }
    }
}

impl DenoiseParameters {
    /// Checks everything that does not depend on a particular file.
    /// Nyquist is checked per file once the sample rate is known.
    pub fn validate(&self) -> Result<()> {
        spectral::validate_parameters(
            self.fft_size,
            self.window_length,
            self.hop_length,
            self.prop_decrease,
        )?;

        if !self.gain_db.is_finite() {
            return Err(DenoiseError::InvalidDenoiseParameters(format!(
                "gain must be finite, got {}",
                self.gain_db
            )));
        }

        let (low, high) = (self.filter_low_hz, self.filter_high_hz);
        if !(low.is_finite() && high.is_finite() && low > 0.0 && low < high) {
            return Err(DenoiseError::InvalidFilterSpec(format!(
                "need 0 < low ({} Hz) < high ({} Hz)",
                low, high
            )));
        }
        if self.filter_order == 0 {
            return Err(DenoiseError::InvalidFilterSpec(
                "filter order must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sample_width(&self) -> SampleWidth {
        SampleWidth::from_preserve_flag(self.preserve_high_bit_depth)
    }
}

/// What was written for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileReport {
    pub channels: usize,
    pub frames: usize,
    pub sample_rate: u32,
}

/// Run the chain on one channel in place
pub fn process_channel(
    channel: &mut [f32],
    noise_range: (usize, usize),
    denoiser: &SpectralDenoiser,
    filter: &BandpassFilter,
    sample_rate: u32,
    gain_db: f32,
) -> Result<()> {
    let profile = {
        let noise = extract_noise_reference(channel, noise_range.0, noise_range.1)?;
        denoiser.estimate_noise_profile(noise)?
    };

    denoiser.process(channel, &profile, sample_rate)?;
    filter.process(channel);
    apply_gain(channel, gain_db);
    Ok(())
}

/// Run the chain on every channel of a decoded buffer
pub fn process_buffer(
    buffer: &mut AudioBuffer,
    window: &NoiseWindow,
    params: &DenoiseParameters,
) -> Result<()> {
    let sample_rate = buffer.sample_rate;
    let noise_range = window.to_sample_range(sample_rate, buffer.len())?;

    let denoiser = SpectralDenoiser::new(
        params.fft_size,
        params.window_length,
        params.hop_length,
        params.prop_decrease,
    )?;
    let filter = BandpassFilter::new(
        sample_rate as f64,
        params.filter_low_hz as f64,
        params.filter_high_hz as f64,
        params.filter_order,
    )?;

    for (index, channel) in buffer.channels.iter_mut().enumerate() {
        log::debug!("Processing channel {} ({} samples)", index, channel.len());
        process_channel(
            channel,
            noise_range,
            &denoiser,
            &filter,
            sample_rate,
            params.gain_db,
        )?;
    }

    Ok(())
}

/// Decode `source`, run the chain and write `destination`
pub fn process_file(
    source: &Path,
    destination: &Path,
    window: &NoiseWindow,
    params: &DenoiseParameters,
) -> Result<FileReport> {
    let mut buffer = audio_util::decode_file(source)?;
    log::debug!(
        "Decoded {:?}: {} ch, {} Hz, {} frames",
        source,
        buffer.num_channels(),
        buffer.sample_rate,
        buffer.len()
    );

    process_buffer(&mut buffer, window, params)?;
    audio_util::encode_file(destination, &buffer, params.sample_width())?;

    Ok(FileReport {
        channels: buffer.num_channels(),
        frames: buffer.len(),
        sample_rate: buffer.sample_rate,
    })
}
