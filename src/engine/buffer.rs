//! Audio Buffer Management
//!
//! Provides the float buffer every stem is decoded into, plus the format
//! descriptor (rate, channels, on-disk subtype) that travels with it.

use std::fmt;

use hound::SampleFormat;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemError};

// ============================================================================
// Sample Subtype
// ============================================================================

/// On-disk sample encoding of a stem.
///
/// Decoding always produces f32; the subtype is kept so the merged output
/// can be written back in exactly the encoding of the base stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSubtype {
    /// 8-bit integer PCM
    Pcm8,
    /// 16-bit integer PCM
    Pcm16,
    /// 24-bit integer PCM
    Pcm24,
    /// 32-bit integer PCM
    Pcm32,
    /// 32-bit IEEE float
    Float32,
}

impl SampleSubtype {
    /// Derive the subtype from a WAV header
    pub fn from_wav_spec(spec: &hound::WavSpec) -> Result<Self> {
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 8) => Ok(SampleSubtype::Pcm8),
            (SampleFormat::Int, 16) => Ok(SampleSubtype::Pcm16),
            (SampleFormat::Int, 24) => Ok(SampleSubtype::Pcm24),
            (SampleFormat::Int, 32) => Ok(SampleSubtype::Pcm32),
            (SampleFormat::Float, 32) => Ok(SampleSubtype::Float32),
            (format, bits) => Err(StemError::UnsupportedFormat {
                format: format!("{}-bit {:?} audio", bits, format),
            }),
        }
    }

    /// Bits per sample on disk
    pub fn bits_per_sample(&self) -> u16 {
        match self {
            SampleSubtype::Pcm8 => 8,
            SampleSubtype::Pcm16 => 16,
            SampleSubtype::Pcm24 => 24,
            SampleSubtype::Pcm32 => 32,
            SampleSubtype::Float32 => 32,
        }
    }

    /// hound sample format for this subtype
    pub fn sample_format(&self) -> SampleFormat {
        match self {
            SampleSubtype::Float32 => SampleFormat::Float,
            _ => SampleFormat::Int,
        }
    }

    /// Full-scale magnitude used to map integer PCM to [-1.0, 1.0)
    ///
    /// Returns None for float subtypes, which are stored unscaled.
    pub fn full_scale(&self) -> Option<f64> {
        match self {
            SampleSubtype::Float32 => None,
            other => Some((1_i64 << (other.bits_per_sample() - 1)) as f64),
        }
    }

    /// Short name as printed in logs ("PCM_16", "FLOAT")
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleSubtype::Pcm8 => "PCM_S8",
            SampleSubtype::Pcm16 => "PCM_16",
            SampleSubtype::Pcm24 => "PCM_24",
            SampleSubtype::Pcm32 => "PCM_32",
            SampleSubtype::Float32 => "FLOAT",
        }
    }
}

impl fmt::Display for SampleSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stem Format
// ============================================================================

/// Format descriptor of a stem: sample rate, channel count and subtype.
///
/// Only `sample_rate` and `channels` gate a merge. The subtype of the first
/// stem is what the output gets written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StemFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// On-disk encoding
    pub subtype: SampleSubtype,
}

impl StemFormat {
    pub fn new(sample_rate: u32, channels: u16, subtype: SampleSubtype) -> Self {
        Self {
            sample_rate,
            channels,
            subtype,
        }
    }

    /// Build a descriptor from a WAV header
    pub fn from_wav_spec(spec: &hound::WavSpec) -> Result<Self> {
        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            subtype: SampleSubtype::from_wav_spec(spec)?,
        })
    }

    /// hound header for writing audio in this format
    pub fn to_wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.subtype.bits_per_sample(),
            sample_format: self.subtype.sample_format(),
        }
    }
}

impl fmt::Display for StemFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz · {} · {} ch",
            self.sample_rate, self.subtype, self.channels
        )
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Float audio buffer used for all stitching in stemmerge
///
/// Stores audio as non-interleaved 32-bit floating point samples, one
/// `Vec<f32>` per channel, so the logical shape is (frames, channels).
/// Mono audio is a single channel. Samples are never clamped here.
///
/// # Example
/// ```
/// use stemmerge::engine::buffer::AudioBuffer;
///
/// // 1 second of stereo silence at 48 kHz
/// let buffer = AudioBuffer::silence(48000, 2, 48000);
/// assert_eq!(buffer.channels(), 2);
/// assert_eq!(buffer.len(), 48000);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is frames
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a zero-filled buffer
    ///
    /// # Arguments
    /// * `frames` - Number of frames per channel
    /// * `channels` - Number of channels
    /// * `sample_rate` - Sample rate in Hz
    pub fn silence(frames: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; channels],
            sample_rate,
        }
    }

    /// Wrap per-channel sample vectors
    ///
    /// All channels must have the same length.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if let Some(first) = samples.first() {
            let frames = first.len();
            if let Some((ch, bad)) = samples.iter().enumerate().find(|(_, c)| c.len() != frames) {
                return Err(StemError::InvalidAudio {
                    reason: format!(
                        "Channel {} has {} frames, expected {}",
                        ch,
                        bad.len(),
                        frames
                    ),
                    source: None,
                });
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Wrap a single mono channel
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: vec![samples],
            sample_rate,
        }
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// # Arguments
    /// * `interleaved` - Interleaved sample data (L, R, L, R, ... for stereo)
    /// * `channels` - Number of interleaved channels
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// Result containing the AudioBuffer, or error if data length doesn't
    /// divide evenly into frames
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(StemError::InvalidAudio {
                reason: "Audio declares zero channels".to_string(),
                source: None,
            });
        }

        if interleaved.len() % channels != 0 {
            return Err(StemError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    channels
                ),
                source: None,
            });
        }

        let frames = interleaved.len() / channels;
        let mut samples = vec![Vec::with_capacity(frames); channels];

        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format
    ///
    /// # Returns
    /// A Vec<f32> with samples in interleaved order (L, R, L, R, ... for stereo)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let frames = self.len();
        let mut interleaved = Vec::with_capacity(self.channels() * frames);

        for frame in 0..frames {
            for channel in &self.samples {
                interleaved.push(channel[frame]);
            }
        }

        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer holds no frames
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Append `frames` frames of digital silence to every channel
    pub fn push_silence(&mut self, frames: usize) {
        for channel in &mut self.samples {
            channel.resize(channel.len() + frames, 0.0);
        }
    }

    /// Append frames `from..` of `other` to this buffer, channel by channel
    ///
    /// # Panics
    /// Panics if `other` has fewer channels than `self`
    pub fn extend_from(&mut self, other: &AudioBuffer, from: usize) {
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            dst.extend_from_slice(&src[from.min(src.len())..]);
        }
    }

    /// Check that no sample is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.samples.iter().flatten().all(|s| s.is_finite())
    }

    /// Largest absolute sample value across all channels
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flatten()
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max)
    }
}

// ============================================================================
// Tests
// ============================================================================
