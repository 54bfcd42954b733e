//! Stemmerge - bit-exact stitching of pre-rendered speech stems
//!
//! Joins short WAV stems into one message without resampling, normalizing
//! or re-encoding anything outside the transitions.
//!
//! # Architecture
//!
//! - `engine`: sample buffers and WAV I/O
//! - `merge`: format guard, timing map, crossfade fold and the merge pipeline
//! - `template` / `cache`: message templates and the stem registry
//! - `config` / `cli`: layered settings and the command-line front end

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod template;

pub use error::{Result, StemError};
pub use merge::{merge_stems, verify_integrity, MergeOptions, MergeReport};
