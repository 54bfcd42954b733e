//! Error handling for stemmerge
//!
//! Every error carries enough context to name the offending stem or file,
//! plus a stable error code and recovery suggestions for the CLI.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::buffer::StemFormat;

/// Result type alias for stemmerge operations
pub type Result<T> = std::result::Result<T, StemError>;

/// Main error type for stemmerge operations
#[derive(Error, Debug)]
pub enum StemError {
    // Merge Errors
    #[error("No stems provided")]
    EmptyInput,

    #[error(
        "Format mismatch in {label}: {} Hz/{} ch != base {} Hz/{} ch",
        .candidate.sample_rate,
        .candidate.channels,
        .base.sample_rate,
        .base.channels
    )]
    FormatMismatch {
        label: String,
        base: StemFormat,
        candidate: StemFormat,
    },

    // File Errors
    #[error("Missing input file: {}", .path.display())]
    MissingFile {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Timing / Template Errors
    #[error("Invalid timing map: {reason}")]
    InvalidTiming { reason: String },

    #[error("Template not found: {}", .path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("Invalid template {}: {reason}", .path.display())]
    InvalidTemplate { path: PathBuf, reason: String },

    // Registry Errors
    #[error("Stem not registered: {name}")]
    StemNotRegistered { name: String },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StemError {
    /// Map a `hound` failure while decoding `path` into a stem error.
    pub(crate) fn from_wav(path: &std::path::Path, err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
                StemError::MissingFile {
                    path: path.to_path_buf(),
                    source: Some(e),
                }
            }
            hound::Error::IoError(e) => StemError::Io(e),
            hound::Error::Unsupported => StemError::UnsupportedFormat {
                format: format!("{} uses an unsupported WAV encoding", path.display()),
            },
            other => StemError::InvalidAudio {
                reason: format!("Failed to decode {}: {}", path.display(), other),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StemError::EmptyInput => "EMPTY_INPUT",
            StemError::FormatMismatch { .. } => "FORMAT_MISMATCH",
            StemError::MissingFile { .. } => "MISSING_FILE",
            StemError::InvalidAudio { .. } => "INVALID_AUDIO",
            StemError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            StemError::InvalidTiming { .. } => "INVALID_TIMING",
            StemError::TemplateNotFound { .. } => "TEMPLATE_NOT_FOUND",
            StemError::InvalidTemplate { .. } => "INVALID_TEMPLATE",
            StemError::StemNotRegistered { .. } => "STEM_NOT_REGISTERED",
            StemError::InvalidConfig { .. } => "INVALID_CONFIG",
            StemError::Io(_) => "IO_ERROR",
            StemError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the caller can fix this error and retry the merge
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StemError::MissingFile { .. }
                | StemError::FormatMismatch { .. }
                | StemError::InvalidTiming { .. }
                | StemError::TemplateNotFound { .. }
                | StemError::StemNotRegistered { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StemError::EmptyInput => vec![
                "Pass at least one stem to merge",
                "Check that the template lists its segments",
            ],
            StemError::FormatMismatch { .. } => vec![
                "Re-render the stem at the base sample rate and channel count",
                "Run 'stemmerge-cli verify' to list every inconsistent stem",
            ],
            StemError::MissingFile { .. } => vec![
                "Check the stem path is correct",
                "Generate the missing stem before assembling",
                "Run 'stemmerge-cli cache summary' to find missing registry files",
            ],
            StemError::InvalidAudio { .. } | StemError::UnsupportedFormat { .. } => vec![
                "Stems must be WAV files (PCM 8/16/24/32-bit or 32-bit float)",
                "The file may be corrupted - try re-rendering it",
            ],
            StemError::InvalidTiming { .. } => vec![
                "timing_map must be a list of {from, to, gap_ms, crossfade_ms} records",
                "or an object keyed \"from->to\"",
            ],
            StemError::TemplateNotFound { .. } => vec![
                "Run 'stemmerge-cli templates' to list available templates",
            ],
            _ => vec![],
        }
    }
}
