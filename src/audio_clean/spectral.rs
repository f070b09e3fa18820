//! Spectral noise suppression using stationary spectral gating
//!
//! A noise profile (per-bin dB mean and spread) is estimated from a
//! reference slice. Time-frequency bins of the signal that do not rise above
//! the profile's threshold are attenuated, with the binary mask smoothed
//! over neighbouring bins and frames to avoid musical noise.

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::error::{DenoiseError, Result};

/// Standard deviations above the noise mean a bin must reach to count as signal
const N_STD_THRESH: f32 = 1.5;
/// Mask smoothing span in frequency
const FREQ_MASK_SMOOTH_HZ: f32 = 500.0;
/// Mask smoothing span in time
const TIME_MASK_SMOOTH_MS: f32 = 50.0;
/// Magnitude floor before converting to dB
const AMP_FLOOR: f32 = 1e-10;
/// Overlap-add positions with less window energy than this are left unnormalised
const WINDOW_SUM_FLOOR: f32 = 1e-8;

/// Per-bin noise statistics from a reference slice
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    mean_db: Vec<f32>,
    std_db: Vec<f32>,
}

impl NoiseProfile {
    /// Gate threshold per frequency bin in dB
    pub fn threshold_db(&self) -> Vec<f32> {
        self.mean_db
            .iter()
            .zip(&self.std_db)
            .map(|(mean, std)| mean + std * N_STD_THRESH)
            .collect()
    }

    pub fn bins(&self) -> usize {
        self.mean_db.len()
    }
}

/// FFT-based spectral gate
pub struct SpectralDenoiser {
    fft_size: usize,
    hop_length: usize,
    prop_decrease: f32,
    forward_fft: Arc<dyn RealToComplex<f32>>,
    inverse_fft: Arc<dyn ComplexToReal<f32>>,
    /// Hann window of `window_length`, centred in an `fft_size` frame
    window: Vec<f32>,
}

impl SpectralDenoiser {
    /// Create a new spectral gate
    ///
    /// # Arguments
    /// * `fft_size` - FFT frame size (typically 2048)
    /// * `window_length` - Hann window length, at most `fft_size`
    /// * `hop_length` - Frame advance in samples (typically `fft_size / 4`)
    /// * `prop_decrease` - 0.0 leaves the signal untouched, 1.0 gates fully
    pub fn new(
        fft_size: usize,
        window_length: usize,
        hop_length: usize,
        prop_decrease: f32,
    ) -> Result<Self> {
        validate_parameters(fft_size, window_length, hop_length, prop_decrease)?;

        let mut planner = RealFftPlanner::<f32>::new();
        let forward_fft = planner.plan_fft_forward(fft_size);
        let inverse_fft = planner.plan_fft_inverse(fft_size);

        let offset = (fft_size - window_length) / 2;
        let mut window = vec![0.0f32; fft_size];
        for i in 0..window_length {
            window[offset + i] = if window_length == 1 {
                1.0
            } else {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / window_length as f32).cos())
            };
        }

        Ok(Self {
            fft_size,
            hop_length,
            prop_decrease,
            forward_fft,
            inverse_fft,
            window,
        })
    }

    /// Estimate the noise profile from a reference slice
    pub fn estimate_noise_profile(&self, noise: &[f32]) -> Result<NoiseProfile> {
        let frames = self.stft(noise)?;
        let bins = self.fft_size / 2 + 1;
        let count = frames.len().max(1) as f32;

        let mut mean_db = vec![0.0f32; bins];
        for frame in &frames {
            for (acc, c) in mean_db.iter_mut().zip(frame) {
                *acc += amp_to_db(c.norm());
            }
        }
        for m in mean_db.iter_mut() {
            *m /= count;
        }

        let mut std_db = vec![0.0f32; bins];
        for frame in &frames {
            for ((acc, c), mean) in std_db.iter_mut().zip(frame).zip(&mean_db) {
                let d = amp_to_db(c.norm()) - mean;
                *acc += d * d;
            }
        }
        for s in std_db.iter_mut() {
            *s = (*s / count).sqrt();
        }

        Ok(NoiseProfile { mean_db, std_db })
    }

    /// Gate `samples` in place against `profile`. Length is preserved.
    pub fn process(&self, samples: &mut [f32], profile: &NoiseProfile, sample_rate: u32) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut frames = self.stft(samples)?;
        let threshold = profile.threshold_db();

        let mut mask: Vec<Vec<f32>> = frames
            .iter()
            .map(|frame| {
                frame
                    .iter()
                    .zip(&threshold)
                    .map(|(c, th)| if amp_to_db(c.norm()) > *th { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect();

        let (freq_radius, time_radius) = self.smoothing_radii(sample_rate);
        smooth_mask(&mut mask, freq_radius, time_radius);

        let keep = 1.0 - self.prop_decrease;
        for (frame, gains) in frames.iter_mut().zip(&mask) {
            for (c, g) in frame.iter_mut().zip(gains) {
                *c = *c * (g * self.prop_decrease + keep);
            }
        }

        let output = self.istft(&mut frames, samples.len())?;
        samples.copy_from_slice(&output);
        Ok(())
    }

    fn smoothing_radii(&self, sample_rate: u32) -> (usize, usize) {
        let sr = sample_rate.max(1) as f32;
        let freq = FREQ_MASK_SMOOTH_HZ / (sr / (self.fft_size as f32 / 2.0));
        let time = TIME_MASK_SMOOTH_MS / (self.hop_length as f32 / sr * 1000.0);
        (freq as usize, time as usize)
    }

    fn frame_count(&self, length: usize) -> usize {
        let padded = length + 2 * (self.fft_size / 2);
        if padded <= self.fft_size {
            1
        } else {
            1 + (padded - self.fft_size + self.hop_length - 1) / self.hop_length
        }
    }

    /// Centred STFT: the signal is zero-padded by `fft_size / 2` on both sides.
    fn stft(&self, signal: &[f32]) -> Result<Vec<Vec<Complex<f32>>>> {
        let pad = self.fft_size / 2;
        let frames = self.frame_count(signal.len());

        let mut buffer = self.forward_fft.make_input_vec();
        let mut out = Vec::with_capacity(frames);

        for t in 0..frames {
            let start = t * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = (start + i)
                    .checked_sub(pad)
                    .and_then(|idx| signal.get(idx))
                    .copied()
                    .unwrap_or(0.0);
                *slot = sample * self.window[i];
            }

            let mut spectrum = self.forward_fft.make_output_vec();
            self.forward_fft
                .process(&mut buffer, &mut spectrum)
                .map_err(fft_failure)?;
            out.push(spectrum);
        }

        Ok(out)
    }

    /// Weighted overlap-add inverse of [`Self::stft`], trimmed to `length`.
    fn istft(&self, frames: &mut [Vec<Complex<f32>>], length: usize) -> Result<Vec<f32>> {
        let n = self.fft_size;
        let pad = n / 2;
        let total = frames.len().saturating_sub(1) * self.hop_length + n;

        let mut output = vec![0.0f32; total];
        let mut window_sum = vec![0.0f32; total];
        let mut time_buffer = self.inverse_fft.make_output_vec();
        let norm = 1.0 / n as f32;

        for (t, spectrum) in frames.iter_mut().enumerate() {
            // DC and Nyquist must be purely real for the inverse transform
            if let Some(dc) = spectrum.first_mut() {
                dc.im = 0.0;
            }
            if n % 2 == 0 {
                if let Some(nyquist) = spectrum.last_mut() {
                    nyquist.im = 0.0;
                }
            }

            self.inverse_fft
                .process(spectrum, &mut time_buffer)
                .map_err(fft_failure)?;

            let start = t * self.hop_length;
            for (i, sample) in time_buffer.iter().enumerate() {
                let w = self.window[i];
                output[start + i] += sample * norm * w;
                window_sum[start + i] += w * w;
            }
        }

        Ok((0..length)
            .map(|i| {
                let idx = i + pad;
                match (output.get(idx), window_sum.get(idx)) {
                    (Some(&y), Some(&ws)) if ws > WINDOW_SUM_FLOOR => y / ws,
                    (Some(&y), _) => y,
                    _ => 0.0,
                }
            })
            .collect())
    }
}

fn fft_failure(e: FftError) -> DenoiseError {
    DenoiseError::InvalidDenoiseParameters(format!("FFT failed: {}", e))
}

pub(crate) fn validate_parameters(
    fft_size: usize,
    window_length: usize,
    hop_length: usize,
    prop_decrease: f32,
) -> Result<()> {
    if fft_size == 0 || window_length == 0 || hop_length == 0 {
        return Err(DenoiseError::InvalidDenoiseParameters(format!(
            "fft_size ({}), window_length ({}) and hop_length ({}) must all be positive",
            fft_size, window_length, hop_length
        )));
    }
    if window_length > fft_size {
        return Err(DenoiseError::InvalidDenoiseParameters(format!(
            "window_length ({}) cannot exceed fft_size ({})",
            window_length, fft_size
        )));
    }
    if !prop_decrease.is_finite() || !(0.0..=1.0).contains(&prop_decrease) {
        return Err(DenoiseError::InvalidDenoiseParameters(format!(
            "prop_decrease must be within 0.0-1.0, got {}",
            prop_decrease
        )));
    }
    Ok(())
}

fn amp_to_db(amplitude: f32) -> f32 {
    20.0 * amplitude.max(AMP_FLOOR).log10()
}

/// Triangular kernel of length `2 * radius + 1`, normalised to unit sum
fn triangular_kernel(radius: usize) -> Vec<f32> {
    let peak = (radius + 1) as f32;
    let kernel: Vec<f32> = (0..=2 * radius)
        .map(|j| (peak - (j as f32 - radius as f32).abs()) / peak)
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.into_iter().map(|k| k / sum).collect()
}

/// Same-size convolution with zeros outside the input
fn convolve_same(input: &[f32], kernel: &[f32]) -> Vec<f32> {
    let radius = kernel.len() / 2;
    (0..input.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(j, k)| {
                    (i + j)
                        .checked_sub(radius)
                        .and_then(|idx| input.get(idx))
                        .map(|x| x * k)
                })
                .sum()
        })
        .collect()
}

/// Separable 2-D smoothing of a frames x bins mask
fn smooth_mask(mask: &mut [Vec<f32>], freq_radius: usize, time_radius: usize) {
    if freq_radius > 0 {
        let kernel = triangular_kernel(freq_radius);
        for frame in mask.iter_mut() {
            *frame = convolve_same(frame, &kernel);
        }
    }

    if time_radius > 0 && mask.len() > 1 {
        let kernel = triangular_kernel(time_radius);
        let bins = mask.first().map(|f| f.len()).unwrap_or(0);
        for k in 0..bins {
            let column: Vec<f32> = mask.iter().map(|frame| frame[k]).collect();
            for (frame, value) in mask.iter_mut().zip(convolve_same(&column, &kernel)) {
                frame[k] = value;
            }
        }
    }
}
