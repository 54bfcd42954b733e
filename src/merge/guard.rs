//! Format Guard
//!
//! Stems are only ever joined, never converted, so every stem has to share
//! the sample rate and channel count of the first one. Subtype is not
//! checked: the output is always written in the base stem's subtype.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::engine::buffer::StemFormat;
use crate::error::{Result, StemError};
use crate::merge::source::{PathStemSource, StemSource};

/// Fail unless `candidate` matches `base` in sample rate and channel count
///
/// # Arguments
/// * `base` - Format of the first stem of the merge
/// * `candidate` - Format of the stem being checked
/// * `label` - Human-readable name of the candidate (usually its file name)
pub fn assert_compatible(base: &StemFormat, candidate: &StemFormat, label: &str) -> Result<()> {
    if candidate.sample_rate != base.sample_rate || candidate.channels != base.channels {
        return Err(StemError::FormatMismatch {
            label: label.to_string(),
            base: *base,
            candidate: *candidate,
        });
    }
    Ok(())
}

/// A stem whose format differs from the reference stem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityMismatch {
    pub id: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Report every candidate whose rate or channel count differs from the first
///
/// Only headers are read; no audio is decoded and nothing is merged.
pub fn verify_integrity<S, I>(source: &S, candidate_ids: I) -> Result<Vec<IntegrityMismatch>>
where
    S: StemSource + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut ids = candidate_ids.into_iter();
    let Some(first) = ids.next() else {
        tracing::warn!("No stems to verify");
        return Ok(Vec::new());
    };

    let reference = source.read_format(first.as_ref())?;
    tracing::info!("Reference format: {} ({})", reference, first.as_ref());

    let mut mismatches = Vec::new();
    for id in ids {
        let id = id.as_ref();
        let format = source.read_format(id)?;
        if assert_compatible(&reference, &format, id).is_err() {
            tracing::warn!(
                "Inconsistent stem {}: {} Hz / {} ch",
                id,
                format.sample_rate,
                format.channels
            );
            mismatches.push(IntegrityMismatch {
                id: id.to_string(),
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        }
    }

    if mismatches.is_empty() {
        tracing::info!("All stems match the reference format");
    }
    Ok(mismatches)
}

/// Run [`verify_integrity`] over every `*.wav` in `dir`, sorted by file name
pub fn verify_directory(dir: &Path) -> Result<Vec<IntegrityMismatch>> {
    let paths = wav_files(dir)?;
    let source = PathStemSource::from_paths(&paths);
    verify_integrity(&source, source.keys())
}

/// List `*.wav` files directly inside `dir`, sorted by file name
pub fn wav_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(StemError::MissingFile {
            path: dir.to_path_buf(),
            source: None,
        });
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StemError::Io(e.into()))?;
        let is_wav = entry
            .path()
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if entry.file_type().is_file() && is_wav {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}
