//! Stem registry backed by `stems_index.json`
//!
//! Tracks every generated stem with its text, voice metadata, creation time
//! and file checksum. Entries older than the cache TTL are treated as absent
//! and can be swept with [`StemRegistry::cleanup_expired_stems`].

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Result, StemError};

/// One registered stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemEntry {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub sample_rate: u32,
    /// ISO-8601 creation time, UTC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub dataset_origin: Option<String>,
    #[serde(default)]
    pub version: u32,
    /// Hex SHA-256 of the audio file at registration time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Keys written by other tools
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StemEntry {
    /// Parsed creation time
    ///
    /// Accepts RFC 3339 and naive ISO-8601 timestamps, the latter read as
    /// UTC. Returns `None` when absent or unparseable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.created.as_deref()?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Whole days since creation, or `None` when the time is unknown
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at().map(|created| (now - created).num_days())
    }
}

/// On-disk layout of the index file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StemIndex {
    #[serde(default)]
    pub stems: BTreeMap<String, StemEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parameters for [`StemRegistry::register_stem`]
#[derive(Debug, Clone)]
pub struct StemRegistration {
    pub name: String,
    pub text: String,
    pub path: PathBuf,
    /// Falls back to the registry default when `None`
    pub voice_id: Option<String>,
    /// Falls back to the registry default when `None`
    pub model_id: Option<String>,
    pub rotational: bool,
    pub dataset_origin: Option<String>,
}

impl StemRegistration {
    pub fn new(name: impl Into<String>, text: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            path: path.into(),
            voice_id: None,
            model_id: None,
            rotational: false,
            dataset_origin: None,
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Mark the stem as produced by a rotational batch from `dataset_origin`
    pub fn rotational(mut self, dataset_origin: impl Into<String>) -> Self {
        self.rotational = true;
        self.dataset_origin = Some(dataset_origin.into());
        self
    }
}

/// Metadata stamped on new entries when a registration leaves it unset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDefaults {
    pub voice_id: String,
    pub model_id: String,
    pub sample_rate: u32,
}

/// Outcome of [`StemRegistry::verify_checksum`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChecksumStatus {
    Match,
    Mismatch { expected: String, actual: String },
    /// Entry predates checksum tracking
    NotRecorded,
}

/// Registry health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub total_stems: usize,
    pub rotational_stems: usize,
    pub dataset_sources: BTreeMap<String, usize>,
    pub missing_files: usize,
    pub expired_entries: usize,
    pub ttl_days: i64,
    pub index_file: PathBuf,
    pub default_voice: String,
    pub default_model: String,
    pub sample_rate: u32,
}

/// Thread-safe handle on one index file
///
/// Every read-modify-write of the index runs under a single lock, so
/// concurrent registrations from the same process never lose updates.
#[derive(Debug)]
pub struct StemRegistry {
    index_path: PathBuf,
    defaults: RegistryDefaults,
    lock: Mutex<()>,
}

impl StemRegistry {
    pub fn new(index_path: impl Into<PathBuf>, defaults: RegistryDefaults) -> Self {
        Self {
            index_path: index_path.into(),
            defaults,
            lock: Mutex::new(()),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn defaults(&self) -> &RegistryDefaults {
        &self.defaults
    }

    /// Load the index, repairing it if necessary
    ///
    /// A missing or unreadable file yields an empty index. A legacy file
    /// that maps names directly to entries is wrapped under `"stems"`.
    pub fn load_index(&self) -> StemIndex {
        let _guard = self.guard();
        self.read_index()
    }

    /// Write the index as pretty-printed JSON
    pub fn save_index(&self, index: &StemIndex) -> Result<()> {
        let _guard = self.guard();
        self.write_index(index)
    }

    /// Look up an entry without any TTL or file checks
    pub fn entry(&self, name: &str) -> Option<StemEntry> {
        self.load_index().stems.remove(name)
    }

    /// Insert or update a stem, bumping its version
    ///
    /// Unknown keys on an existing entry are preserved. The checksum is
    /// recomputed when the audio file is readable.
    pub fn register_stem(&self, registration: StemRegistration) -> Result<StemEntry> {
        let _guard = self.guard();
        let mut index = self.read_index();

        let existing = index.stems.remove(&registration.name);
        let (version, extra) = existing
            .map(|e| (e.version, e.extra))
            .unwrap_or_default();

        let checksum = match file_checksum(&registration.path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                tracing::warn!(
                    "No checksum for {} ({}): {}",
                    registration.name,
                    registration.path.display(),
                    e
                );
                None
            }
        };

        let entry = StemEntry {
            text: registration.text,
            path: registration.path,
            voice_id: registration
                .voice_id
                .unwrap_or_else(|| self.defaults.voice_id.clone()),
            model_id: registration
                .model_id
                .unwrap_or_else(|| self.defaults.model_id.clone()),
            sample_rate: self.defaults.sample_rate,
            created: Some(Utc::now().to_rfc3339()),
            rotational: registration.rotational,
            dataset_origin: registration.dataset_origin,
            version: version + 1,
            checksum,
            extra,
        };

        index.stems.insert(registration.name.clone(), entry.clone());
        self.write_index(&index)?;

        tracing::info!(
            "{} stem registered: {} (v{}) @ {}",
            if entry.rotational { "Rotational" } else { "Static" },
            registration.name,
            entry.version,
            entry.path.display()
        );
        Ok(entry)
    }

    /// Register a stem generated from a rotational dataset
    pub fn register_rotational_stem(
        &self,
        name: &str,
        text: &str,
        path: &Path,
        dataset_origin: &str,
    ) -> Result<StemEntry> {
        self.register_stem(StemRegistration::new(name, text, path).rotational(dataset_origin))
    }

    /// Path of a cached stem, if registered, present on disk and fresh
    ///
    /// An entry with an unparseable creation time is treated as fresh.
    pub fn get_cached_stem(&self, name: &str, max_age_days: i64) -> Option<PathBuf> {
        self.cached_at(name, max_age_days, Utc::now())
    }

    fn cached_at(&self, name: &str, max_age_days: i64, now: DateTime<Utc>) -> Option<PathBuf> {
        let entry = self.entry(name)?;

        if !entry.path.exists() {
            tracing::warn!("Cached stem missing file: {}", entry.path.display());
            return None;
        }

        let age = entry.age_days(now).unwrap_or_else(|| {
            tracing::warn!("Invalid creation time for {}, skipping TTL check", name);
            0
        });
        if age > max_age_days {
            tracing::debug!("Stem expired: {} ({} days old)", name, age);
            return None;
        }

        Some(entry.path)
    }

    /// Remove expired entries and delete their audio files
    ///
    /// Entries without a creation time are kept; entries with an
    /// unparseable one are skipped with a warning. Returns the number of
    /// entries removed.
    pub fn cleanup_expired_stems(&self, max_age_days: i64) -> Result<usize> {
        self.cleanup_at(max_age_days, Utc::now())
    }

    fn cleanup_at(&self, max_age_days: i64, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.guard();
        let mut index = self.read_index();

        let mut deleted = Vec::new();
        for (name, entry) in &index.stems {
            let age = match (&entry.created, entry.age_days(now)) {
                (None, _) => continue,
                (Some(_), Some(age)) => age,
                (Some(raw), None) => {
                    tracing::warn!("Cleanup skipped {}: invalid creation time {:?}", name, raw);
                    continue;
                }
            };
            if age <= max_age_days {
                continue;
            }
            if entry.path.exists() {
                if let Err(e) = fs::remove_file(&entry.path) {
                    tracing::warn!("Cleanup skipped {}: {}", name, e);
                    continue;
                }
            }
            deleted.push(name.clone());
        }

        if !deleted.is_empty() {
            for name in &deleted {
                index.stems.remove(name);
            }
            self.write_index(&index)?;
            tracing::info!("Removed {} expired stems: {:?}", deleted.len(), deleted);
        }
        Ok(deleted.len())
    }

    /// Compare the recorded checksum with the file on disk
    ///
    /// # Errors
    /// * `StemNotRegistered` - If `name` has no entry
    /// * `MissingFile` - If the audio file is gone
    pub fn verify_checksum(&self, name: &str) -> Result<ChecksumStatus> {
        let entry = self.entry(name).ok_or_else(|| StemError::StemNotRegistered {
            name: name.to_string(),
        })?;
        let Some(expected) = entry.checksum else {
            return Ok(ChecksumStatus::NotRecorded);
        };

        let actual = file_checksum(&entry.path)?;
        if actual == expected {
            Ok(ChecksumStatus::Match)
        } else {
            tracing::warn!("Checksum mismatch for {}", name);
            Ok(ChecksumStatus::Mismatch { expected, actual })
        }
    }

    /// Totals for monitoring
    pub fn summarize(&self, ttl_days: i64) -> CacheSummary {
        self.summarize_at(ttl_days, Utc::now())
    }

    fn summarize_at(&self, ttl_days: i64, now: DateTime<Utc>) -> CacheSummary {
        let index = self.load_index();
        let mut dataset_sources = BTreeMap::new();
        let mut rotational_stems = 0;
        let mut missing_files = 0;
        let mut expired_entries = 0;

        for entry in index.stems.values() {
            if entry.rotational {
                rotational_stems += 1;
            }
            if let Some(origin) = &entry.dataset_origin {
                *dataset_sources.entry(origin.clone()).or_insert(0) += 1;
            }
            if !entry.path.exists() {
                missing_files += 1;
            }
            if entry.age_days(now).is_some_and(|age| age > ttl_days) {
                expired_entries += 1;
            }
        }

        CacheSummary {
            total_stems: index.stems.len(),
            rotational_stems,
            dataset_sources,
            missing_files,
            expired_entries,
            ttl_days,
            index_file: self.index_path.clone(),
            default_voice: self.defaults.voice_id.clone(),
            default_model: self.defaults.model_id.clone(),
            sample_rate: self.defaults.sample_rate,
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_index(&self) -> StemIndex {
        let content = match fs::read_to_string(&self.index_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StemIndex::default(),
            Err(e) => {
                tracing::warn!("Index {} unreadable, recreating: {}", self.index_path.display(), e);
                return StemIndex::default();
            }
        };

        match parse_index(&content) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("Index {} corrupted, recreating: {}", self.index_path.display(), e);
                StemIndex::default()
            }
        }
    }

    fn write_index(&self, index: &StemIndex) -> Result<()> {
        if let Some(parent) = self.index_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(index)?;
        fs::write(&self.index_path, json)?;
        Ok(())
    }
}

fn parse_index(content: &str) -> Result<StemIndex> {
    let value: Value = serde_json::from_str(content)?;
    let value = match value {
        Value::Object(map) if !map.contains_key("stems") => {
            tracing::warn!("Legacy index without \"stems\" wrapper, wrapping");
            let mut wrapped = Map::new();
            wrapped.insert("stems".to_string(), Value::Object(map));
            Value::Object(wrapped)
        }
        other => other,
    };
    Ok(serde_json::from_value(value)?)
}

/// Hex SHA-256 of a file's contents
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| StemError::MissingFile {
        path: path.to_path_buf(),
        source: Some(e),
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
