//! Transition timing
//!
//! Templates describe per-transition timing loosely: either a list of
//! `{from, to, gap_ms, crossfade_ms}` records or an object keyed
//! `"from->to"`. Both are normalized here into one [`TimingTable`] keyed by
//! the ordered stem-id pair, so the merger only ever sees strict types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StemError};

/// Separator used by the object form of a timing map ("from->to")
pub const PAIR_SEPARATOR: &str = "->";

/// Legacy default crossfade applied when a transition has no entry
pub const LEGACY_DEFAULT_CROSSFADE_MS: f64 = 10.0;

/// Longest gap or crossfade a transition may ask for
pub const MAX_TRANSITION_MS: f64 = 60_000.0;

/// Gap and crossfade for one transition, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionTiming {
    /// Silence inserted at the transition
    #[serde(default)]
    pub gap_ms: f64,
    /// Overlap during which both stems are audible
    #[serde(default)]
    pub crossfade_ms: f64,
}

impl TransitionTiming {
    pub fn new(gap_ms: f64, crossfade_ms: f64) -> Self {
        Self {
            gap_ms,
            crossfade_ms,
        }
    }

    /// Silence length in frames at `sample_rate` (unclamped)
    pub fn gap_samples(&self, sample_rate: u32) -> usize {
        ms_to_samples(sample_rate, self.gap_ms)
    }

    /// Requested overlap in frames at `sample_rate`, before clamping to the
    /// neighboring stems
    pub fn crossfade_samples(&self, sample_rate: u32) -> usize {
        ms_to_samples(sample_rate, self.crossfade_ms)
    }

    /// Fail unless both durations are finite and at most
    /// [`MAX_TRANSITION_MS`]. Negative durations pass; they read as zero.
    pub fn validate(&self) -> Result<()> {
        for (name, ms) in [("gap_ms", self.gap_ms), ("crossfade_ms", self.crossfade_ms)] {
            if !ms.is_finite() || ms > MAX_TRANSITION_MS {
                return Err(StemError::InvalidTiming {
                    reason: format!("{} = {} is not a duration of at most {} ms", name, ms, MAX_TRANSITION_MS),
                });
            }
        }
        Ok(())
    }
}

impl Default for TransitionTiming {
    /// Gap 0 ms, crossfade 10 ms
    fn default() -> Self {
        Self {
            gap_ms: 0.0,
            crossfade_ms: LEGACY_DEFAULT_CROSSFADE_MS,
        }
    }
}

/// Convert a duration in milliseconds to a whole number of frames
///
/// Uses round-half-to-even and floors negative or NaN durations at zero.
pub fn ms_to_samples(sample_rate: u32, ms: f64) -> usize {
    let frames = (sample_rate as f64 * ms / 1000.0).round_ties_even();
    if frames.is_nan() || frames <= 0.0 {
        0
    } else {
        frames as usize
    }
}

/// Per-transition timing keyed by (from-id, to-id)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingTable {
    entries: HashMap<(String, String), TransitionTiming>,
    skipped: usize,
}

impl TimingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from tuple-keyed entries
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = ((A, B), TransitionTiming)>,
        A: Into<String>,
        B: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|((from, to), timing)| ((from.into(), to.into()), timing))
            .collect();
        Self {
            entries,
            skipped: 0,
        }
    }

    /// Normalize a timing map from template JSON
    ///
    /// Accepts a list of records, an object keyed `"from->to"`, or `null`.
    /// Records without `from`/`to` (or keys without a separator) are skipped
    /// and counted; a missing `gap_ms` or `crossfade_ms` reads as 0. So are
    /// records whose durations fail [`TransitionTiming::validate`].
    ///
    /// # Errors
    /// * `InvalidTiming` - If the top-level value is any other shape
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::from_json_with(value, |id| id.to_string())
    }

    /// Like [`TimingTable::from_json`], mapping every id through `resolve_id`
    pub fn from_json_with<F>(value: &Value, resolve_id: F) -> Result<Self>
    where
        F: Fn(&str) -> String,
    {
        let mut table = Self::new();
        match value {
            Value::Null => {}
            Value::Array(records) => {
                for (index, record) in records.iter().enumerate() {
                    match parse_record(record) {
                        Some((from, to, timing)) => {
                            table.insert(resolve_id(&from), resolve_id(&to), timing);
                        }
                        None => table.skip(&format!("record #{}", index)),
                    }
                }
            }
            Value::Object(map) => {
                for (key, entry) in map {
                    match parse_keyed(key, entry) {
                        Some((from, to, timing)) => {
                            table.insert(resolve_id(from), resolve_id(to), timing);
                        }
                        None => table.skip(&format!("key '{}'", key)),
                    }
                }
            }
            other => {
                return Err(StemError::InvalidTiming {
                    reason: format!(
                        "expected a list or an object, found {}",
                        json_kind(other)
                    ),
                })
            }
        }
        Ok(table)
    }

    /// Insert or replace the timing for a transition
    pub fn insert(&mut self, from: impl Into<String>, to: impl Into<String>, timing: TransitionTiming) {
        self.entries.insert((from.into(), to.into()), timing);
    }

    /// Timing for the transition `from -> to`, if the table has one
    pub fn get(&self, from: &str, to: &str) -> Option<&TransitionTiming> {
        self.entries.get(&(from.to_string(), to.to_string()))
    }

    /// Number of transitions in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of malformed records dropped during normalization
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Render as the list form, sorted by (from, to)
    pub fn to_json(&self) -> Value {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        Value::Array(
            keys.into_iter()
                .map(|key| {
                    let timing = &self.entries[key];
                    serde_json::json!({
                        "from": key.0,
                        "to": key.1,
                        "gap_ms": timing.gap_ms,
                        "crossfade_ms": timing.crossfade_ms,
                    })
                })
                .collect(),
        )
    }

    fn skip(&mut self, what: &str) {
        self.skipped += 1;
        tracing::warn!("Skipping malformed timing entry ({})", what);
    }
}

fn parse_record(record: &Value) -> Option<(String, String, TransitionTiming)> {
    let obj = record.as_object()?;
    let from = id_field(obj.get("from")?)?;
    let to = id_field(obj.get("to")?)?;
    Some((from, to, timing_fields(obj)?))
}

fn parse_keyed<'a>(key: &'a str, entry: &Value) -> Option<(&'a str, &'a str, TransitionTiming)> {
    let (from, to) = key.split_once(PAIR_SEPARATOR)?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from, to, timing_fields(entry.as_object()?)?))
}

/// Ids may be written as strings or bare numbers
fn id_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timing_fields(obj: &Map<String, Value>) -> Option<TransitionTiming> {
    let number = |key: &str| obj.get(key).and_then(number_field).unwrap_or(0.0);
    let timing = TransitionTiming {
        gap_ms: number("gap_ms"),
        crossfade_ms: number("crossfade_ms"),
    };
    timing.validate().ok().map(|()| timing)
}

/// Numbers may also arrive as numeric strings ("90")
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case(48000, 20.0, 960 ; "twenty ms at 48k")]
    #[test_case(48000, 100.0, 4800 ; "hundred ms at 48k")]
    #[test_case(44100, 10.0, 441 ; "ten ms at 44k1")]
    #[test_case(48000, 0.0, 0 ; "zero")]
    #[test_case(48000, -15.0, 0 ; "negative floors at zero")]
    #[test_case(1000, 2.5, 2 ; "half rounds to even down")]
    #[test_case(1000, 3.5, 4 ; "half rounds to even up")]
    fn test_ms_to_samples(sample_rate: u32, ms: f64, expected: usize) {
        assert_eq!(ms_to_samples(sample_rate, ms), expected);
    }

    #[test]
    fn test_nan_duration_is_zero() {
        assert_eq!(ms_to_samples(48000, f64::NAN), 0);
    }

    #[test]
    fn test_list_form() {
        let value = json!([
            {"from": "stem_1_intro", "to": "stem_2_followup", "gap_ms": 90, "crossfade_ms": 18},
            {"from": "stem_2_followup", "to": "stem_3_brand", "gap_ms": 60.5},
        ]);
        let table = TimingTable::from_json(&value).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("stem_1_intro", "stem_2_followup"),
            Some(&TransitionTiming::new(90.0, 18.0))
        );
        // Missing crossfade inside a record reads as zero, not the default.
        assert_eq!(
            table.get("stem_2_followup", "stem_3_brand"),
            Some(&TransitionTiming::new(60.5, 0.0))
        );
        assert!(table.get("stem_2_followup", "stem_1_intro").is_none());
    }

    #[test]
    fn test_object_form() {
        let value = json!({
            "static_1_hey->name_john": {"gap_ms": 80, "crossfade_ms": 15},
            "dev_hilton -> static_5_closing": {"gap_ms": "40", "crossfade_ms": 25},
        });
        let table = TimingTable::from_json(&value).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("dev_hilton", "static_5_closing"),
            Some(&TransitionTiming::new(40.0, 25.0))
        );
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let value = json!([
            {"from": "a", "gap_ms": 10},
            "not a record",
            {"to": "b"},
            {"from": "a", "to": "b", "crossfade_ms": 5},
        ]);
        let table = TimingTable::from_json(&value).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.skipped(), 3);
    }

    #[test]
    fn test_out_of_range_durations_are_skipped() {
        let value = json!([
            {"from": "a", "to": "b", "gap_ms": 1e300, "crossfade_ms": 0},
            {"from": "b", "to": "c", "gap_ms": 0, "crossfade_ms": "inf"},
            {"from": "c", "to": "d", "gap_ms": "NaN"},
            {"from": "d", "to": "e", "gap_ms": 60000, "crossfade_ms": -5},
        ]);
        let table = TimingTable::from_json(&value).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.skipped(), 3);
        assert!(table.get("a", "b").is_none());
        assert_eq!(table.get("d", "e"), Some(&TransitionTiming::new(60000.0, -5.0)));
    }

    #[test_case(1e300, 0.0 ; "huge gap")]
    #[test_case(0.0, f64::INFINITY ; "infinite crossfade")]
    #[test_case(f64::NAN, 0.0 ; "nan gap")]
    fn test_validate_rejects(gap_ms: f64, crossfade_ms: f64) {
        let err = TransitionTiming::new(gap_ms, crossfade_ms).validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TIMING");
    }

    #[test]
    fn test_object_key_without_separator_is_skipped() {
        let value = json!({"a_b": {"gap_ms": 1}, "a->b": {"gap_ms": 2}});
        let table = TimingTable::from_json(&value).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.skipped(), 1);
    }

    #[test]
    fn test_null_is_empty_table() {
        let table = TimingTable::from_json(&Value::Null).unwrap();
        assert!(table.is_empty());
    }

    #[test_case(json!("a->b") ; "string")]
    #[test_case(json!(42) ; "number")]
    #[test_case(json!(true) ; "boolean")]
    fn test_unknown_shape_is_rejected(value: Value) {
        let err = TimingTable::from_json(&value).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TIMING");
    }

    #[test]
    fn test_from_pairs_and_list_rendering() {
        let table = TimingTable::from_pairs([
            (("b", "c"), TransitionTiming::new(1.0, 2.0)),
            (("a", "b"), TransitionTiming::new(3.0, 4.0)),
        ]);

        let rendered = table.to_json();
        assert_eq!(rendered[0]["from"], "a");
        assert_eq!(rendered[1]["to"], "c");
        assert_eq!(TimingTable::from_json(&rendered).unwrap(), table);
    }

    #[test]
    fn test_resolve_ids() {
        let value = json!([{"from": "name_{name}", "to": "dev_{developer}", "gap_ms": 5}]);
        let table = TimingTable::from_json_with(&value, |id| {
            id.replace("{name}", "john").replace("{developer}", "hilton")
        })
        .unwrap();

        assert!(table.get("name_john", "dev_hilton").is_some());
    }

    #[test]
    fn test_default_timing_is_legacy() {
        let timing = TransitionTiming::default();
        assert_eq!(timing.gap_ms, 0.0);
        assert_eq!(timing.crossfade_ms, 10.0);
        assert_eq!(timing.crossfade_samples(48000), 480);
    }
}
