//! Zero-phase band-limiting filter
//!
//! A Butterworth high-pass at the low cutoff cascaded with a Butterworth
//! low-pass at the high cutoff, each of the requested order, run forward
//! then backward so transients are not shifted in time.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::error::{DenoiseError, Result};

/// Band-pass filter design for one sample rate
#[derive(Debug, Clone)]
pub struct BandpassFilter {
    sections: Vec<Coefficients<f64>>,
    order: usize,
}

impl BandpassFilter {
    /// Design the filter
    ///
    /// # Arguments
    /// * `sample_rate` - Audio sample rate in Hz
    /// * `low_hz` - High-pass corner, must be above 0
    /// * `high_hz` - Low-pass corner, must be below Nyquist
    /// * `order` - Butterworth order of each edge (typically 4-8)
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64, order: usize) -> Result<Self> {
        let nyquist = sample_rate / 2.0;
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(DenoiseError::InvalidFilterSpec(format!(
                "need 0 < low ({} Hz) < high ({} Hz) < Nyquist ({} Hz)",
                low_hz, high_hz, nyquist
            )));
        }
        if order == 0 {
            return Err(DenoiseError::InvalidFilterSpec(
                "filter order must be at least 1".to_string(),
            ));
        }

        let mut sections = butterworth_sections(Edge::HighPass, sample_rate, low_hz, order)?;
        sections.extend(butterworth_sections(Edge::LowPass, sample_rate, high_hz, order)?);

        Ok(Self { sections, order })
    }

    /// Filter forward then backward in place. Length is preserved.
    pub fn process(&self, samples: &mut [f32]) {
        let len = samples.len();
        if len == 0 {
            return;
        }

        // Odd extension at both ends to tame start-up transients
        let pad = (3 * (2 * self.order + 1)).min(len - 1);
        let first = samples[0] as f64;
        let last = samples[len - 1] as f64;

        let mut extended: Vec<f64> = Vec::with_capacity(len + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - samples[i] as f64));
        extended.extend(samples.iter().map(|&s| s as f64));
        extended.extend((1..=pad).map(|i| 2.0 * last - samples[len - 1 - i] as f64));

        self.run_cascade(&mut extended);
        extended.reverse();
        self.run_cascade(&mut extended);
        extended.reverse();

        for (out, y) in samples.iter_mut().zip(&extended[pad..pad + len]) {
            *out = *y as f32;
        }
    }

    fn run_cascade(&self, data: &mut [f64]) {
        for coeffs in &self.sections {
            let mut section = DirectForm2Transposed::<f64>::new(*coeffs);
            for x in data.iter_mut() {
                *x = section.run(*x);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    HighPass,
    LowPass,
}

impl Edge {
    fn biquad_type(self) -> Type<f64> {
        match self {
            Edge::HighPass => Type::HighPass,
            Edge::LowPass => Type::LowPass,
        }
    }
}

/// Second-order sections (plus one first-order section for odd orders) of
/// a digital Butterworth high- or low-pass.
fn butterworth_sections(
    edge: Edge,
    sample_rate: f64,
    cutoff_hz: f64,
    order: usize,
) -> Result<Vec<Coefficients<f64>>> {
    let mut sections = Vec::with_capacity(order / 2 + 1);

    for k in 0..order / 2 {
        let angle = (2 * k + 1) as f64 * std::f64::consts::PI / (2 * order) as f64;
        let q = 1.0 / (2.0 * angle.sin());
        let coeffs = Coefficients::<f64>::from_params(
            edge.biquad_type(),
            sample_rate.hz(),
            cutoff_hz.hz(),
            q,
        )
        .map_err(|e| {
            DenoiseError::InvalidFilterSpec(format!(
                "Failed to create coefficients at {} Hz: {:?}",
                cutoff_hz, e
            ))
        })?;
        sections.push(coeffs);
    }

    if order % 2 == 1 {
        sections.push(first_order_section(edge, sample_rate, cutoff_hz));
    }

    Ok(sections)
}

/// Bilinear-transformed one-pole section
fn first_order_section(edge: Edge, sample_rate: f64, cutoff_hz: f64) -> Coefficients<f64> {
    let k = (std::f64::consts::PI * cutoff_hz / sample_rate).tan();
    let norm = 1.0 / (1.0 + k);
    let a1 = (k - 1.0) * norm;
    let (b0, b1) = match edge {
        Edge::HighPass => (norm, -norm),
        Edge::LowPass => (k * norm, k * norm),
    };
    Coefficients {
        a1,
        a2: 0.0,
        b0,
        b1,
        b2: 0.0,
    }
}
