//! Stem merging
//!
//! - Format guard and integrity checks
//! - Timing-map normalization
//! - Crossfade/gap fold and tail fade
//! - The end-to-end `merge_stems` pipeline

pub mod fade;
pub mod guard;
pub mod merger;
pub mod pipeline;
pub mod source;
pub mod timing;

pub use fade::{apply_tail_fade, cosine_fade, linear_fade_out};
pub use guard::{assert_compatible, verify_directory, verify_integrity, wav_files, IntegrityMismatch};
pub use merger::{MergedAudio, StemMerger, TransitionReport};
pub use pipeline::{merge_stems, write_merged, MergeOptions, MergeReport, DEFAULT_TAIL_FADE_MS};
pub use source::{DirectoryStemSource, PathStemSource, Stem, StemSource};
pub use timing::{ms_to_samples, TimingTable, TransitionTiming, MAX_TRANSITION_MS};
