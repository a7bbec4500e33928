//! Shared domain types
//!
//! A [`Sample`] is one time-stamped point of a stream. Streams are addressed
//! per target by a fixed [`StreamKey`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GlucoError;

/// Tag written to the events stream when a sensor session starts.
pub const SENSOR_START_TAG: &str = "sensor_start";

/// Value carried by a sample: a numeric reading or a fixed string tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Tag(String),
}

impl SampleValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SampleValue::Number(n) => Some(*n),
            SampleValue::Tag(_) => None,
        }
    }

    pub fn as_tag(&self) -> Option<&str> {
        match self {
            SampleValue::Number(_) => None,
            SampleValue::Tag(tag) => Some(tag),
        }
    }
}

/// A single time-stamped point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch, fractional
    pub t: f64,
    /// The reading
    #[serde(rename = "d")]
    pub value: SampleValue,
}

impl Sample {
    pub fn new(t: f64, value: SampleValue) -> Self {
        Self { t, value }
    }

    pub fn numeric(t: f64, value: f64) -> Self {
        Self::new(t, SampleValue::Number(value))
    }

    pub fn tag(t: f64, tag: impl Into<String>) -> Self {
        Self::new(t, SampleValue::Tag(tag.into()))
    }

    /// Build a sample from a millisecond source timestamp
    pub fn from_millis(ms: i64, value: SampleValue) -> Self {
        Self::new(millis_to_secs(ms), value)
    }
}

/// Convert a millisecond epoch timestamp to fractional seconds
pub fn millis_to_secs(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

/// Convert fractional seconds to a millisecond epoch timestamp
pub fn secs_to_millis(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}

/// Logical stream owned by a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKey {
    /// Continuous sensor glucose
    Cgm,
    /// Finger-stick blood glucose
    BloodTest,
    /// Sensor lifecycle events
    Events,
}

impl StreamKey {
    pub const ALL: [StreamKey; 3] = [StreamKey::Cgm, StreamKey::BloodTest, StreamKey::Events];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKey::Cgm => "cgm",
            StreamKey::BloodTest => "blood_test",
            StreamKey::Events => "events",
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKey {
    type Err = GlucoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cgm" => Ok(StreamKey::Cgm),
            "blood_test" => Ok(StreamKey::BloodTest),
            "events" => Ok(StreamKey::Events),
            other => Err(GlucoError::Internal(format!("unknown stream key: {other}"))),
        }
    }
}

/// How a batch treats samples whose timestamp already exists in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InsertMode {
    /// Keep the existing sample
    #[default]
    Append,
    /// Replace the existing sample (last write wins)
    Overwrite,
}

impl InsertMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsertMode::Append => "append",
            InsertMode::Overwrite => "overwrite",
        }
    }
}

/// Order samples by time and collapse points that share a millisecond.
///
/// Numeric values in a group are averaged. A group with no numeric value
/// keeps its last tag.
pub fn coalesce(mut samples: Vec<Sample>) -> Vec<Sample> {
    samples.sort_by(|a, b| a.t.total_cmp(&b.t));

    let mut out: Vec<Sample> = Vec::with_capacity(samples.len());
    let mut group: Vec<Sample> = Vec::new();
    let mut group_key: Option<i64> = None;

    for sample in samples {
        let key = secs_to_millis(sample.t);
        if group_key.is_some_and(|k| k != key) {
            out.push(collapse(std::mem::take(&mut group)));
        }
        group_key = Some(key);
        group.push(sample);
    }
    if !group.is_empty() {
        out.push(collapse(group));
    }

    out
}

fn collapse(mut group: Vec<Sample>) -> Sample {
    if group.len() == 1 {
        if let Some(only) = group.pop() {
            return only;
        }
    }

    let t = group.first().map(|s| s.t).unwrap_or_default();
    let numbers: Vec<f64> = group.iter().filter_map(|s| s.value.as_number()).collect();
    if !numbers.is_empty() {
        let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
        return Sample::numeric(t, avg);
    }

    match group.pop() {
        Some(last) => Sample::new(t, last.value),
        None => Sample::new(t, SampleValue::Tag(String::new())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_round_trip_names() {
        for key in StreamKey::ALL {
            assert_eq!(key.as_str().parse::<StreamKey>().unwrap(), key);
        }
        assert!("glucose".parse::<StreamKey>().is_err());
    }

    #[test]
    fn test_millis_conversion() {
        assert_eq!(millis_to_secs(1_560_000_000_500), 1_560_000_000.5);
        assert_eq!(secs_to_millis(1_560_000_000.5), 1_560_000_000_500);
    }

    #[test]
    fn test_coalesce_averages_duplicates() {
        let samples = vec![
            Sample::numeric(20.0, 110.0),
            Sample::numeric(10.0, 100.0),
            Sample::numeric(10.0, 120.0),
        ];

        let out = coalesce(samples);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Sample::numeric(10.0, 110.0));
        assert_eq!(out[1], Sample::numeric(20.0, 110.0));
    }

    #[test]
    fn test_coalesce_sub_millisecond_collision() {
        let out = coalesce(vec![
            Sample::numeric(10.0001, 90.0),
            Sample::numeric(10.0002, 110.0),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, SampleValue::Number(100.0));
    }

    #[test]
    fn test_coalesce_tags_keep_last() {
        let out = coalesce(vec![Sample::tag(5.0, "a"), Sample::tag(5.0, SENSOR_START_TAG)]);
        assert_eq!(out, vec![Sample::tag(5.0, SENSOR_START_TAG)]);
    }

    #[test]
    fn test_sample_serializes_compactly() {
        let json = serde_json::to_value(Sample::numeric(1.5, 99.0)).unwrap();
        assert_eq!(json, serde_json::json!({"t": 1.5, "d": 99.0}));

        let tag: Sample = serde_json::from_value(serde_json::json!({"t": 2.0, "d": "sensor_start"})).unwrap();
        assert_eq!(tag.value.as_tag(), Some(SENSOR_START_TAG));
    }
}
