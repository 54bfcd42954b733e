//! Stem cache
//!
//! Registry of generated stems with TTL, checksum and dataset tracking.

pub mod registry;

pub use registry::{
    file_checksum, CacheSummary, ChecksumStatus, RegistryDefaults, StemEntry, StemIndex,
    StemRegistration, StemRegistry,
};
