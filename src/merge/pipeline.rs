//! End-to-end stem merge: read, join, fade the tail, write

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::buffer::StemFormat;
use crate::engine::io::write_wav;
use crate::error::{Result, StemError};
use crate::merge::guard::assert_compatible;
use crate::merge::merger::{MergedAudio, StemMerger, TransitionReport};
use crate::merge::source::StemSource;
use crate::merge::timing::{TimingTable, TransitionTiming};

/// Default end-of-message safety fade
pub const DEFAULT_TAIL_FADE_MS: f64 = 5.0;

/// Knobs for [`merge_stems`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// Timing used when the table has no entry for a transition
    pub default_timing: TransitionTiming,
    /// Linear fade applied to the end of the merged audio; 0 disables it
    pub tail_fade_ms: f64,
    /// Check every stem header before decoding any audio
    pub eager_validation: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            default_timing: TransitionTiming::default(),
            tail_fade_ms: DEFAULT_TAIL_FADE_MS,
            eager_validation: false,
        }
    }
}

/// Summary of a completed merge
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub output_path: PathBuf,
    pub frames: usize,
    pub duration_secs: f64,
    pub format: StemFormat,
    /// Largest absolute sample; the merge never clamps, so this may exceed 1.0
    pub peak: f32,
    pub bytes_written: u64,
    pub stem_ids: Vec<String>,
    pub transitions: Vec<TransitionReport>,
}

impl MergeReport {
    /// Transitions that fell back to the default timing
    pub fn defaulted(&self) -> impl Iterator<Item = &TransitionReport> {
        self.transitions.iter().filter(|t| t.used_default)
    }
}

/// Merge `stem_ids` from `source` into a single WAV at `output_path`
///
/// Stems are read in order and joined with the timing in `timing`. The
/// output is written in the first stem's format, and only once every stem
/// has been merged; on any error nothing is written.
///
/// # Errors
/// * `EmptyInput` - If `stem_ids` is empty
/// * `MissingFile` - If a stem cannot be resolved
/// * `FormatMismatch` - If a stem differs from the first in rate or channels
pub fn merge_stems<S, I>(
    source: &S,
    stem_ids: I,
    timing: &TimingTable,
    output_path: &Path,
    options: &MergeOptions,
) -> Result<MergeReport>
where
    S: StemSource + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let started = Instant::now();
    let ids: Vec<String> = stem_ids.into_iter().map(|id| id.as_ref().to_string()).collect();
    if ids.is_empty() {
        return Err(StemError::EmptyInput);
    }
    tracing::info!("Merging {} stems into {}", ids.len(), output_path.display());

    if options.eager_validation {
        validate_headers(source, &ids)?;
    }

    let merged = StemMerger::new(timing, options.default_timing)
        .merge_from(source, &ids)?
        .finish(options.tail_fade_ms);

    let report = write_merged(merged, output_path)?;
    tracing::info!(
        "Wrote {} ({} frames, {:.2}s) in {:.1} ms",
        report.output_path.display(),
        report.frames,
        report.duration_secs,
        started.elapsed().as_secs_f64() * 1000.0
    );
    Ok(report)
}

/// Write finished audio and describe it
pub fn write_merged(merged: MergedAudio, output_path: &Path) -> Result<MergeReport> {
    if !merged.buffer.is_finite() {
        tracing::warn!("Merged audio for {} contains non-finite samples", output_path.display());
    }
    let peak = merged.buffer.peak();
    if peak > 1.0 {
        tracing::warn!("Merged audio peaks at {:.3}, above full scale", peak);
    }

    let bytes_written = write_wav(output_path, &merged.buffer, merged.format)?;
    Ok(MergeReport {
        output_path: output_path.to_path_buf(),
        frames: merged.buffer.len(),
        duration_secs: merged.buffer.duration_secs(),
        format: merged.format,
        peak,
        bytes_written,
        stem_ids: merged.stem_ids,
        transitions: merged.transitions,
    })
}

fn validate_headers<S: StemSource + ?Sized>(source: &S, ids: &[String]) -> Result<()> {
    let mut formats = ids.iter().map(|id| source.read_format(id).map(|f| (id, f)));
    let Some(first) = formats.next() else {
        return Err(StemError::EmptyInput);
    };
    let (_, base) = first?;
    for next in formats {
        let (id, format) = next?;
        assert_compatible(&base, &format, &source.label(id))?;
    }
    tracing::debug!("Validated {} stem headers against {}", ids.len(), base);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{AudioBuffer, SampleSubtype};
    use crate::engine::io::{read_stem, write_wav};
    use crate::merge::source::DirectoryStemSource;
    use pretty_assertions::assert_eq;

    fn write_stem(dir: &Path, id: &str, frames: usize, format: StemFormat) {
        let buffer = AudioBuffer::silence(frames, format.channels as usize, format.sample_rate);
        write_wav(&dir.join(format!("{}.wav", id)), &buffer, format).unwrap();
    }

    #[test]
    fn test_empty_ids() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryStemSource::new(dir.path());
        let out = dir.path().join("out.wav");
        let ids: Vec<&str> = Vec::new();

        let err = merge_stems(&source, ids, &TimingTable::new(), &out, &MergeOptions::default())
            .unwrap_err();

        assert_eq!(err.error_code(), "EMPTY_INPUT");
        assert!(!out.exists());
    }

    #[test]
    fn test_merge_writes_base_format() {
        let dir = tempfile::tempdir().unwrap();
        let pcm = StemFormat::new(8000, 1, SampleSubtype::Pcm16);
        write_stem(dir.path(), "a", 800, pcm);
        write_stem(dir.path(), "b", 800, StemFormat::new(8000, 1, SampleSubtype::Float32));

        let source = DirectoryStemSource::new(dir.path());
        let out = dir.path().join("out").join("merged.wav");
        let report = merge_stems(
            &source,
            ["a", "b"],
            &TimingTable::new(),
            &out,
            &MergeOptions::default(),
        )
        .unwrap();

        // 10 ms default crossfade at 8 kHz overlaps 80 frames.
        assert_eq!(report.frames, 1520);
        assert_eq!(report.format, pcm);
        assert_eq!(report.defaulted().count(), 1);

        let (buffer, format) = read_stem(&out).unwrap();
        assert_eq!(format, pcm);
        assert_eq!(buffer.len(), 1520);
    }

    #[test]
    fn test_eager_validation_rejects_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        write_stem(dir.path(), "a", 10, StemFormat::new(8000, 1, SampleSubtype::Float32));
        write_stem(dir.path(), "b", 10, StemFormat::new(16000, 1, SampleSubtype::Float32));

        let source = DirectoryStemSource::new(dir.path());
        let out = dir.path().join("merged.wav");
        let options = MergeOptions {
            eager_validation: true,
            ..MergeOptions::default()
        };

        let err = merge_stems(&source, ["a", "b", "missing"], &TimingTable::new(), &out, &options)
            .unwrap_err();

        assert_eq!(err.error_code(), "FORMAT_MISMATCH");
        assert!(!out.exists());
    }
}
