//! Fade curves
//!
//! Crossfades use a raised-cosine pair whose two halves always sum to one
//! (amplitude-complementary, not equal-power). The end-of-message safety
//! fade is a plain linear ramp.

use std::f64::consts::PI;

use crate::engine::buffer::AudioBuffer;
use crate::merge::timing::ms_to_samples;

/// Fade-out and fade-in curves of length `n`
///
/// `fade_out[t] = (1 + cos(pi * t / (n - 1))) / 2` descends from 1 to 0, and
/// `fade_in[t] = 1 - fade_out[t]`. A single-sample curve is `[1]` / `[0]`.
pub fn cosine_fade(n: usize) -> (Vec<f32>, Vec<f32>) {
    let fade_out: Vec<f32> = match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let step = PI / (n - 1) as f64;
            (0..n)
                .map(|t| ((1.0 + (step * t as f64).cos()) / 2.0) as f32)
                .collect()
        }
    };
    let fade_in = fade_out.iter().map(|&g| 1.0 - g).collect();
    (fade_out, fade_in)
}

/// Linear ramp of length `n` from 1.0 down to 0.0, endpoints included
pub fn linear_fade_out(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let last = (n - 1) as f64;
            (0..n).map(|t| (1.0 - t as f64 / last) as f32).collect()
        }
    }
}

/// Fade the last `tail_fade_ms` of `buffer` to silence
///
/// Consumes the buffer and returns it with the final
/// `min(round(sr * ms / 1000), len)` frames scaled by [`linear_fade_out`].
/// A non-positive duration or an empty buffer is returned untouched.
pub fn apply_tail_fade(mut buffer: AudioBuffer, tail_fade_ms: f64) -> AudioBuffer {
    if tail_fade_ms.is_nan() || tail_fade_ms <= 0.0 || buffer.is_empty() {
        return buffer;
    }

    let n = ms_to_samples(buffer.sample_rate, tail_fade_ms).min(buffer.len());
    let start = buffer.len() - n;
    let ramp = linear_fade_out(n);

    for channel in &mut buffer.samples {
        for (sample, gain) in channel[start..].iter_mut().zip(&ramp) {
            *sample *= gain;
        }
    }

    buffer
}
