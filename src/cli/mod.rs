//! CLI Module
//!
//! Command-line interface for merging, verifying and assembling stems.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stemmerge - bit-exact stitching of pre-rendered speech stems
#[derive(Parser, Debug)]
#[command(name = "stemmerge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON settings file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the stems directory
    #[arg(long, global = true)]
    pub stems_dir: Option<PathBuf>,

    /// Override the stem index file
    #[arg(long, global = true)]
    pub index_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Merge WAV files in order into one output file
    #[command(name = "merge")]
    Merge {
        /// Input stems, in playback order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output WAV path
        #[arg(short, long)]
        output: PathBuf,

        /// JSON timing map (list or "from->to" object), keyed by file stem
        #[arg(short, long)]
        timing: Option<PathBuf>,

        /// Silence for transitions missing from the timing map (ms)
        #[arg(long)]
        gap_ms: Option<f64>,

        /// Crossfade for transitions missing from the timing map (ms)
        #[arg(long)]
        crossfade_ms: Option<f64>,

        /// Linear fade-out at the end of the message (ms, 0 disables)
        #[arg(long)]
        tail_fade_ms: Option<f64>,

        /// Check every header before decoding any audio
        #[arg(long)]
        eager: bool,
    },

    /// Report stems whose format differs from the first
    #[command(name = "verify")]
    Verify {
        /// Stems to check; the first is the reference
        files: Vec<PathBuf>,

        /// Check every WAV in a directory instead
        #[arg(short, long, conflicts_with = "files")]
        dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assemble a personalized message from a template
    #[command(name = "assemble")]
    Assemble {
        /// Recipient name
        #[arg(long)]
        name: String,

        /// Developer name
        #[arg(long)]
        developer: String,

        /// Template file name inside the template directory
        #[arg(long)]
        template: Option<String>,

        /// Output WAV path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List available templates
    #[command(name = "templates")]
    Templates,

    /// Inspect or maintain the stem cache
    #[command(name = "cache", subcommand)]
    Cache(CacheCommands),

    /// Print effective settings
    #[command(name = "config")]
    Config,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print cache statistics
    #[command(name = "summary")]
    Summary,

    /// Remove expired stems and their files
    #[command(name = "cleanup")]
    Cleanup {
        /// Maximum age in days (defaults to the configured TTL)
        #[arg(long)]
        max_age_days: Option<i64>,
    },

    /// Register or update a stem
    #[command(name = "register")]
    Register {
        /// Stem id
        name: String,

        /// Audio file
        path: PathBuf,

        /// Spoken text of the stem
        #[arg(long)]
        text: String,

        /// Voice id (defaults to the configured voice)
        #[arg(long)]
        voice_id: Option<String>,

        /// Dataset the stem was generated from; marks it rotational
        #[arg(long)]
        dataset: Option<String>,
    },

    /// Check a stem's file against its recorded checksum
    #[command(name = "verify")]
    Verify {
        /// Stem id
        name: String,
    },
}
