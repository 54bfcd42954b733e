//! Audio file I/O for stemmerge
//!
//! Reads WAV stems into 32-bit float buffers and writes merged buffers back
//! out. Nothing here resamples or changes bit depth: a stem is decoded at its
//! native rate, and output is encoded in the subtype it is handed.

use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavWriter};
use uuid::Uuid;

use crate::engine::buffer::{AudioBuffer, SampleSubtype, StemFormat};
use crate::error::{Result, StemError};

/// Read only the header of a WAV stem
///
/// # Errors
/// * `MissingFile` - If the file does not exist
/// * `InvalidAudio` - If the header cannot be parsed
/// * `UnsupportedFormat` - If the encoding has no matching subtype
pub fn read_stem_format(path: &Path) -> Result<StemFormat> {
    ensure_exists(path)?;
    let reader = WavReader::open(path).map_err(|e| StemError::from_wav(path, e))?;
    StemFormat::from_wav_spec(&reader.spec())
}

/// Read a WAV stem as 32-bit float
///
/// Integer PCM is scaled by its full-scale magnitude (2^(bits-1)), so a
/// later write in the same subtype reproduces the original integers exactly.
///
/// # Returns
/// * `Ok((AudioBuffer, StemFormat))` - Samples at the native rate and the
///   descriptor taken from the header
///
/// # Errors
/// * `MissingFile` - If the file does not exist
/// * `InvalidAudio` - If the file is not a valid WAV file
/// * `UnsupportedFormat` - If the encoding has no matching subtype
pub fn read_stem(path: &Path) -> Result<(AudioBuffer, StemFormat)> {
    ensure_exists(path)?;
    let reader = WavReader::open(path).map_err(|e| StemError::from_wav(path, e))?;
    let format = StemFormat::from_wav_spec(&reader.spec())?;

    let interleaved = read_samples_as_f32(reader, format.subtype, path)?;
    let buffer =
        AudioBuffer::from_interleaved(&interleaved, format.channels as usize, format.sample_rate)?;

    Ok((buffer, format))
}

/// Write a buffer to `path` in the given format
///
/// The audio is written to a hidden sibling file first and renamed into
/// place once the WAV header is finalized, so a failed write never leaves a
/// truncated file at `path`. Missing parent directories are created.
///
/// # Returns
/// * `Ok(u64)` - Size of the written file in bytes
pub fn write_wav(path: &Path, buffer: &AudioBuffer, format: StemFormat) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let partial = partial_path(path);
    let written = WavWriter::create(&partial, format.to_wav_spec())
        .map_err(|e| StemError::from_wav(&partial, e))
        .and_then(|writer| write_samples(writer, buffer, format.subtype, &partial));

    if let Err(e) = written {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    fs::rename(&partial, path)?;
    Ok(fs::metadata(path)?.len())
}

/// Write a buffer as WAV into any seekable writer
pub fn write_wav_to<W: Write + Seek>(
    writer: W,
    buffer: &AudioBuffer,
    format: StemFormat,
) -> Result<()> {
    let label = Path::new("<stream>");
    let wav = WavWriter::new(writer, format.to_wav_spec()).map_err(|e| StemError::from_wav(label, e))?;
    write_samples(wav, buffer, format.subtype, label)
}

/// Derive a stem id from a storage path (its file stem)
pub fn stem_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Generate a mono sine tone
///
/// # Arguments
/// * `frequency` - Frequency of the sine wave in Hz
/// * `frames` - Length of the tone in frames
/// * `amplitude` - Peak amplitude
/// * `sample_rate` - Sample rate in Hz
pub fn generate_test_tone(frequency: f32, frames: usize, amplitude: f32, sample_rate: u32) -> AudioBuffer {
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    let samples = (0..frames)
        .map(|i| amplitude * (angular_freq * i as f32).sin())
        .collect();
    AudioBuffer::mono(samples, sample_rate)
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(StemError::MissingFile {
            path: path.to_path_buf(),
            source: None,
        });
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.wav".to_string());
    path.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4()))
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    subtype: SampleSubtype,
    path: &Path,
) -> Result<Vec<f32>> {
    let samples = match (subtype.sample_format(), subtype.full_scale()) {
        (SampleFormat::Float, _) | (_, None) => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
        (SampleFormat::Int, Some(scale)) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| (v as f64 / scale) as f32))
            .collect::<std::result::Result<Vec<f32>, _>>(),
    };

    samples.map_err(|e| StemError::InvalidAudio {
        reason: format!("Failed to read {} samples from {}: {}", subtype, path.display(), e),
        source: Some(Box::new(e)),
    })
}

/// Encode every frame of `buffer` and finalize the header
fn write_samples<W: Write + Seek>(
    mut writer: WavWriter<W>,
    buffer: &AudioBuffer,
    subtype: SampleSubtype,
    path: &Path,
) -> Result<()> {
    let wav_err = |e: hound::Error| StemError::from_wav(path, e);

    match subtype.full_scale() {
        None => {
            for frame in 0..buffer.len() {
                for channel in &buffer.samples {
                    writer.write_sample(channel[frame]).map_err(wav_err)?;
                }
            }
        }
        Some(scale) => {
            // Integer containers cannot hold values past full scale.
            let (lo, hi) = (-scale, scale - 1.0);
            for frame in 0..buffer.len() {
                for channel in &buffer.samples {
                    let value = (channel[frame] as f64 * scale).round().clamp(lo, hi) as i32;
                    writer.write_sample(value).map_err(wav_err)?;
                }
            }
        }
    }

    writer.finalize().map_err(wav_err)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_fixture(path: &Path, buffer: &AudioBuffer, subtype: SampleSubtype) -> StemFormat {
        let format = StemFormat::new(buffer.sample_rate, buffer.channels() as u16, subtype);
        write_wav(path, buffer, format).unwrap();
        format
    }

    #[test]
    fn test_round_trip_float_is_bit_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let original = generate_test_tone(440.0, 4800, 0.8, 48000);

        let format = write_fixture(&path, &original, SampleSubtype::Float32);
        let (decoded, decoded_format) = read_stem(&path).unwrap();

        assert_eq!(decoded_format, format);
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_round_trip_pcm16_preserves_integers() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.wav");
        let second = dir.path().join("second.wav");

        let tone = generate_test_tone(1000.0, 2000, 0.5, 44100);
        write_fixture(&first, &tone, SampleSubtype::Pcm16);

        // Decode and re-encode: the second file must carry identical samples.
        let (decoded, format) = read_stem(&first).unwrap();
        assert_eq!(format.subtype, SampleSubtype::Pcm16);
        write_wav(&second, &decoded, format).unwrap();

        let a: Vec<i16> = WavReader::open(&first).unwrap().samples::<i16>().map(|s| s.unwrap()).collect();
        let b: Vec<i16> = WavReader::open(&second).unwrap().samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_round_trip_stereo_pcm24() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let left = generate_test_tone(440.0, 1000, 0.5, 48000);
        let right = generate_test_tone(880.0, 1000, 0.5, 48000);
        let stereo = AudioBuffer::from_channels(
            vec![left.channel(0).to_vec(), right.channel(0).to_vec()],
            48000,
        )
        .unwrap();

        write_fixture(&path, &stereo, SampleSubtype::Pcm24);
        let (decoded, format) = read_stem(&path).unwrap();

        assert_eq!(format.channels, 2);
        assert_eq!(decoded.len(), 1000);
        for ch in 0..2 {
            for (orig, dec) in stereo.channel(ch).iter().zip(decoded.channel(ch)) {
                assert!((orig - dec).abs() < 1e-6, "{} vs {}", orig, dec);
            }
        }
    }

    #[test]
    fn test_int_write_clamps_overshoot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hot.wav");
        let hot = AudioBuffer::mono(vec![1.5, -1.5], 48000);

        write_fixture(&path, &hot, SampleSubtype::Pcm16);
        let raw: Vec<i16> = WavReader::open(&path).unwrap().samples::<i16>().map(|s| s.unwrap()).collect();

        assert_eq!(raw, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_read_stem_format_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hdr.wav");
        let buffer = AudioBuffer::silence(10, 2, 22050);
        write_fixture(&path, &buffer, SampleSubtype::Pcm8);

        let format = read_stem_format(&path).unwrap();
        assert_eq!(format, StemFormat::new(22050, 2, SampleSubtype::Pcm8));
    }

    #[test]
    fn test_write_creates_parents_and_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out").join("merged.wav");
        let buffer = AudioBuffer::silence(480, 1, 48000);

        let bytes = write_wav(&path, &buffer, StemFormat::new(48000, 1, SampleSubtype::Float32)).unwrap();

        assert!(path.exists());
        assert_eq!(bytes, fs::metadata(&path).unwrap().len());
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_to_memory() {
        let buffer = generate_test_tone(440.0, 100, 0.5, 48000);
        let mut cursor = std::io::Cursor::new(Vec::new());
        write_wav_to(&mut cursor, &buffer, StemFormat::new(48000, 1, SampleSubtype::Float32)).unwrap();

        cursor.set_position(0);
        let reader = WavReader::new(cursor).unwrap();
        assert_eq!(reader.len(), 100);
    }

    #[test]
    fn test_read_nonexistent_file() {
        let result = read_stem(Path::new("/nonexistent/path/stem.wav"));

        match result.unwrap_err() {
            StemError::MissingFile { path, .. } => {
                assert!(path.to_string_lossy().contains("nonexistent"));
            }
            other => panic!("Expected MissingFile error, got: {:?}", other),
        }
    }

    #[test]
    fn test_read_garbage_is_invalid_audio() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        fs::write(&path, b"definitely not a riff header").unwrap();

        let err = read_stem(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AUDIO");
    }

    #[test]
    fn test_stem_id_from_path() {
        assert_eq!(stem_id_from_path(Path::new("stems/static_1_hey.wav")), "static_1_hey");
        assert_eq!(stem_id_from_path(Path::new("name_john")), "name_john");
    }
}
