//! Message templates
//!
//! A template lists the segments of a message in playback order, the timing
//! between them and the voice settings used to generate missing stems.
//! Segment ids and texts may contain `{name}` and `{developer}` placeholders.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use walkdir::WalkDir;

use crate::error::{Result, StemError};
use crate::merge::timing::TimingTable;

/// One segment of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

impl Segment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Voice parameters passed to stem generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub speed: f64,
    pub volume: f64,
    pub tone: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            volume: 1.0,
            tone: "neutral".to_string(),
        }
    }
}

/// Values substituted into a template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateVars {
    pub name: String,
    pub developer: String,
}

impl TemplateVars {
    pub fn new(name: impl Into<String>, developer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            developer: developer.into(),
        }
    }

    /// Replace placeholders with the values as given
    pub fn substitute_text(&self, text: &str) -> String {
        text.replace("{name}", &self.name)
            .replace("{developer}", &self.developer)
    }

    /// Replace placeholders with id-safe values: lowercase, spaces as `_`
    pub fn substitute_id(&self, id: &str) -> String {
        id.replace("{name}", &id_fragment(&self.name))
            .replace("{developer}", &id_fragment(&self.developer))
    }
}

fn id_fragment(value: &str) -> String {
    value.trim().to_lowercase().replace(' ', "_")
}

/// A parsed template file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Raw timing map; list or `"from->to"` object form
    #[serde(default)]
    pub timing_map: Value,
    #[serde(default)]
    pub voice_config: VoiceConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    /// Segments with placeholders filled in
    pub fn build_segments(&self, vars: &TemplateVars) -> Vec<Segment> {
        self.segments
            .iter()
            .map(|seg| Segment::new(vars.substitute_id(&seg.id), vars.substitute_text(&seg.text)))
            .collect()
    }

    /// Segments to assemble, falling back to the stock message layout when
    /// the template defines none
    pub fn segments_or_fallback(&self, vars: &TemplateVars) -> Vec<Segment> {
        let segments = self.build_segments(vars);
        if !segments.is_empty() {
            return segments;
        }
        tracing::warn!("Template has no segments, using fallback order");
        fallback_segments(vars)
    }

    /// Normalized timing table with placeholders in ids filled in
    ///
    /// # Errors
    /// * `InvalidTiming` - If `timing_map` is neither a list, an object nor null
    pub fn timing_table(&self, vars: &TemplateVars) -> Result<TimingTable> {
        TimingTable::from_json_with(&self.timing_map, |id| vars.substitute_id(id))
    }
}

/// Stock message layout
pub fn fallback_segments(vars: &TemplateVars) -> Vec<Segment> {
    vec![
        Segment::new("static_1_hey", "Hey"),
        Segment::new(format!("name_{}", id_fragment(&vars.name)), vars.name.clone()),
        Segment::new("static_3_its_luis", "it's Luis - about your"),
        Segment::new(format!("dev_{}", id_fragment(&vars.developer)), vars.developer.clone()),
        Segment::new(
            "stem_4_closing",
            "But I wanted to make sure everything is handled, thank you.",
        ),
    ]
}

/// Read a template file
///
/// # Errors
/// * `TemplateNotFound` - If the file does not exist
/// * `InvalidTemplate` - If it is not a valid template document
pub fn load_template(path: &Path) -> Result<Template> {
    if !path.is_file() {
        return Err(StemError::TemplateNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(path)?;
    let template: Template =
        serde_json::from_str(&content).map_err(|e| StemError::InvalidTemplate {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    tracing::debug!(
        "Loaded template {} ({} segments)",
        path.display(),
        template.segments.len()
    );
    Ok(template)
}

/// Resolve a template name against `dir`, defaulting to `default_name`
pub fn template_path(dir: &Path, name: Option<&str>, default_name: &str) -> PathBuf {
    dir.join(name.unwrap_or(default_name))
}

/// File names of the `*.json` templates in `dir`, sorted
pub fn list_templates(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(StemError::TemplateNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut names = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| StemError::Io(e.into()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}
