//! Stem sources
//!
//! A [`StemSource`] resolves a stem id to audio. The merger asks for each
//! stem only when the fold reaches it, so a source is never asked for a stem
//! that comes after a failing one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::engine::buffer::{AudioBuffer, StemFormat};
use crate::engine::io::{read_stem, read_stem_format, stem_id_from_path};
use crate::error::{Result, StemError};

/// One decoded stem: its id, samples and on-disk format
#[derive(Debug, Clone, PartialEq)]
pub struct Stem {
    pub id: String,
    pub buffer: AudioBuffer,
    pub format: StemFormat,
}

impl Stem {
    pub fn new(id: impl Into<String>, buffer: AudioBuffer, format: StemFormat) -> Self {
        Self {
            id: id.into(),
            buffer,
            format,
        }
    }
}

/// Resolves stem ids to audio
pub trait StemSource {
    /// Read only the format of a stem
    fn read_format(&self, id: &str) -> Result<StemFormat>;

    /// Read and decode a stem
    ///
    /// Fails with `MissingFile` when the id does not resolve to a readable
    /// file.
    fn read_stem(&self, id: &str) -> Result<Stem>;

    /// Name used for the stem in errors and logs
    fn label(&self, id: &str) -> String {
        id.to_string()
    }
}

/// Stems stored as `<root>/<id>.wav`
#[derive(Debug, Clone)]
pub struct DirectoryStemSource {
    root: PathBuf,
}

impl DirectoryStemSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a stem id maps to
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.wav", id))
    }
}

impl StemSource for DirectoryStemSource {
    fn read_format(&self, id: &str) -> Result<StemFormat> {
        read_stem_format(&self.path_for(id))
    }

    fn read_stem(&self, id: &str) -> Result<Stem> {
        let (buffer, format) = read_stem(&self.path_for(id))?;
        Ok(Stem::new(id, buffer, format))
    }

    fn label(&self, id: &str) -> String {
        format!("{}.wav", id)
    }
}

/// Stems at explicit paths
///
/// Each entry has a lookup key and a stem id. The id is the file stem and
/// is what timing tables match on; the key only has to be unique, so two
/// files with the same stem in different directories stay distinct.
#[derive(Debug, Clone, Default)]
pub struct PathStemSource {
    entries: HashMap<String, PathEntry>,
    order: Vec<String>,
}

#[derive(Debug, Clone)]
struct PathEntry {
    id: String,
    path: PathBuf,
}

impl PathStemSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every path in order; see [`PathStemSource::push`]
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut source = Self::new();
        for path in paths {
            source.push(path.as_ref());
        }
        source
    }

    /// Add a file under its file stem and return its lookup key
    ///
    /// The key is the stem id itself, or `"<id>#<n>"` when an earlier path
    /// already uses that id.
    pub fn push(&mut self, path: impl Into<PathBuf>) -> String {
        let path = path.into();
        let id = stem_id_from_path(&path);
        let mut key = id.clone();
        let mut n = 2;
        while self.entries.contains_key(&key) {
            key = format!("{}#{}", id, n);
            n += 1;
        }
        self.order.push(key.clone());
        self.entries.insert(key.clone(), PathEntry { id, path });
        key
    }

    /// Insert or replace a stem whose key and id are both `id`
    pub fn insert(&mut self, id: impl Into<String>, path: impl Into<PathBuf>) {
        let id = id.into();
        if !self.entries.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entries.insert(
            id.clone(),
            PathEntry {
                id,
                path: path.into(),
            },
        );
    }

    /// Lookup keys in insertion order
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    /// Path registered under a key
    pub fn path_for(&self, key: &str) -> Result<&Path> {
        self.entry(key).map(|e| e.path.as_path())
    }

    fn entry(&self, key: &str) -> Result<&PathEntry> {
        self.entries.get(key).ok_or_else(|| StemError::MissingFile {
            path: PathBuf::from(key),
            source: None,
        })
    }
}

impl StemSource for PathStemSource {
    fn read_format(&self, key: &str) -> Result<StemFormat> {
        read_stem_format(self.path_for(key)?)
    }

    fn read_stem(&self, key: &str) -> Result<Stem> {
        let entry = self.entry(key)?;
        let (buffer, format) = read_stem(&entry.path)?;
        Ok(Stem::new(entry.id.clone(), buffer, format))
    }

    fn label(&self, key: &str) -> String {
        self.entries
            .get(key)
            .and_then(|e| e.path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.to_string())
    }
}
