//! Audio engine
//!
//! - Planar sample buffers and on-disk formats
//! - WAV reading and atomic writing

pub mod buffer;
pub mod io;

pub use buffer::{AudioBuffer, SampleSubtype, StemFormat};
pub use io::{generate_test_tone, read_stem, read_stem_format, stem_id_from_path, write_wav, write_wav_to};
