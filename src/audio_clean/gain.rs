//! Output gain with hard clipping

/// Scale by `gain_db` and saturate to [-1.0, 1.0]
pub fn apply_gain(samples: &mut [f32], gain_db: f32) {
    let gain = 10.0_f32.powf(gain_db / 20.0);
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}
