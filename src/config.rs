//! Settings
//!
//! Resolved in layers: built-in defaults, then an optional JSON file, then
//! `STEMMERGE_*` environment variables, then command-line flags (applied by
//! the CLI on the returned value).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{RegistryDefaults, StemRegistry};
use crate::error::{Result, StemError};
use crate::merge::pipeline::MergeOptions;
use crate::merge::source::DirectoryStemSource;
use crate::merge::timing::{TransitionTiming, MAX_TRANSITION_MS};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "STEMMERGE_";

/// Effective configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stems_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template_dir: PathBuf,
    pub index_file: PathBuf,
    pub default_template: String,
    pub cache_ttl_days: i64,
    pub default_gap_ms: f64,
    pub default_crossfade_ms: f64,
    pub tail_fade_ms: f64,
    pub eager_validation: bool,
    pub voice_id: String,
    pub model_id: String,
    pub sample_rate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stems_dir: PathBuf::from("stems"),
            output_dir: PathBuf::from("output"),
            template_dir: PathBuf::from("templates"),
            index_file: PathBuf::from("stems_index.json"),
            default_template: "double_anchor_hybrid_v3_3.json".to_string(),
            cache_ttl_days: 30,
            default_gap_ms: 0.0,
            default_crossfade_ms: 10.0,
            tail_fade_ms: 5.0,
            eager_validation: false,
            voice_id: "9e5605e6-e70a-4a78-bf39-7c6b0db9c359".to_string(),
            model_id: "sonic-3".to_string(),
            sample_rate: 48000,
        }
    }
}

impl Settings {
    /// Defaults, overlaid with `config_file` (if given) and the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut settings = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults overlaid with a JSON file; absent keys keep their default
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| StemError::MissingFile {
            path: path.to_path_buf(),
            source: Some(e),
        })?;
        serde_json::from_str(&content).map_err(|e| StemError::InvalidConfig {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    /// Overlay `STEMMERGE_<FIELD>` variables, looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("STEMS_DIR") {
            self.stems_dir = PathBuf::from(v);
        }
        if let Some(v) = var("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(v);
        }
        if let Some(v) = var("INDEX_FILE") {
            self.index_file = PathBuf::from(v);
        }
        if let Some(v) = var("DEFAULT_TEMPLATE") {
            self.default_template = v;
        }
        if let Some(v) = var("VOICE_ID") {
            self.voice_id = v;
        }
        if let Some(v) = var("MODEL_ID") {
            self.model_id = v;
        }
        if let Some(v) = var("CACHE_TTL_DAYS") {
            self.cache_ttl_days = parse_var("CACHE_TTL_DAYS", &v)?;
        }
        if let Some(v) = var("DEFAULT_GAP_MS") {
            self.default_gap_ms = parse_var("DEFAULT_GAP_MS", &v)?;
        }
        if let Some(v) = var("DEFAULT_CROSSFADE_MS") {
            self.default_crossfade_ms = parse_var("DEFAULT_CROSSFADE_MS", &v)?;
        }
        if let Some(v) = var("TAIL_FADE_MS") {
            self.tail_fade_ms = parse_var("TAIL_FADE_MS", &v)?;
        }
        if let Some(v) = var("SAMPLE_RATE") {
            self.sample_rate = parse_var("SAMPLE_RATE", &v)?;
        }
        if let Some(v) = var("EAGER_VALIDATION") {
            self.eager_validation = parse_flag(&v);
        }
        Ok(())
    }

    /// Reject values no merge could use
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("default_gap_ms", self.default_gap_ms),
            ("default_crossfade_ms", self.default_crossfade_ms),
            ("tail_fade_ms", self.tail_fade_ms),
        ];
        for (name, value) in durations {
            if !value.is_finite() {
                return Err(StemError::InvalidConfig {
                    reason: format!("{} must be a finite number of milliseconds", name),
                });
            }
        }
        for (name, value) in &durations[..2] {
            if *value > MAX_TRANSITION_MS {
                return Err(StemError::InvalidConfig {
                    reason: format!("{} must be at most {} ms", name, MAX_TRANSITION_MS),
                });
            }
        }
        if self.cache_ttl_days < 0 {
            return Err(StemError::InvalidConfig {
                reason: "cache_ttl_days must not be negative".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(StemError::InvalidConfig {
                reason: "sample_rate must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Timing used for transitions a timing table does not cover
    pub fn default_timing(&self) -> TransitionTiming {
        TransitionTiming::new(self.default_gap_ms, self.default_crossfade_ms)
    }

    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            default_timing: self.default_timing(),
            tail_fade_ms: self.tail_fade_ms,
            eager_validation: self.eager_validation,
        }
    }

    pub fn registry(&self) -> StemRegistry {
        StemRegistry::new(
            &self.index_file,
            RegistryDefaults {
                voice_id: self.voice_id.clone(),
                model_id: self.model_id.clone(),
                sample_rate: self.sample_rate,
            },
        )
    }

    pub fn stem_source(&self) -> DirectoryStemSource {
        DirectoryStemSource::new(&self.stems_dir)
    }

    /// Path of a template, by file name or the configured default
    pub fn template_path(&self, name: Option<&str>) -> PathBuf {
        crate::template::template_path(&self.template_dir, name, &self.default_template)
    }

    /// Effective values as JSON
    pub fn summary(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| StemError::InvalidConfig {
        reason: format!("{}{}={:?}: {}", ENV_PREFIX, name, value, e),
    })
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_timing(), TransitionTiming::new(0.0, 10.0));
        assert_eq!(settings.merge_options(), MergeOptions::default());
        assert_eq!(settings.cache_ttl_days, 30);
    }

    #[test]
    fn test_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemmerge.json");
        fs::write(&path, r#"{ "stems_dir": "/data/stems", "tail_fade_ms": 0 }"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();

        assert_eq!(settings.stems_dir, PathBuf::from("/data/stems"));
        assert_eq!(settings.tail_fade_ms, 0.0);
        assert_eq!(settings.default_crossfade_ms, 10.0);
    }

    #[test]
    fn test_bad_file_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemmerge.json");
        fs::write(&path, r#"{ "sample_rate": "fast" }"#).unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env_of(&[
                ("STEMMERGE_DEFAULT_CROSSFADE_MS", "25"),
                ("STEMMERGE_EAGER_VALIDATION", "true"),
                ("STEMMERGE_STEMS_DIR", "cache/stems"),
                ("DEFAULT_GAP_MS", "999"),
            ]))
            .unwrap();

        assert_eq!(settings.default_crossfade_ms, 25.0);
        assert!(settings.eager_validation);
        assert_eq!(settings.stems_dir, PathBuf::from("cache/stems"));
        assert_eq!(settings.default_gap_ms, 0.0);
    }

    #[test]
    fn test_env_parse_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env_of(&[("STEMMERGE_SAMPLE_RATE", "48k")]))
            .unwrap_err();
        assert!(err.to_string().contains("STEMMERGE_SAMPLE_RATE"));
    }

    #[test]
    fn test_validate_rejects_nan() {
        let settings = Settings {
            tail_fade_ms: f64::NAN,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_huge_gap() {
        let settings = Settings {
            default_gap_ms: 1e300,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_summary_is_flat_json() {
        let summary = Settings::default().summary().unwrap();
        assert_eq!(summary["model_id"], "sonic-3");
        assert_eq!(summary["sample_rate"], 48000);
    }
}
