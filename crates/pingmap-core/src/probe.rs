//! Probe records and ingest-boundary normalization.
//!
//! Clients send loosely shaped JSON (`lat` or `latitude`, numeric or string
//! ids, epoch-millis or ISO-8601 timestamps). [`normalize_batch`] turns a
//! request body into canonical [`Probe`]s and counts everything it had to
//! drop, so nothing downstream deals with field-name ambiguity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::CoreError;

/// Source id some clients send when they could not identify the radio.
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Canonical probe: coordinates validated, timestamp parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Timestamp exactly as the client sent it; part of the derived dedup key.
    pub timestamp_raw: String,
    pub timestamp: DateTime<Utc>,
    pub source_id: Option<String>,
    pub source_name: Option<String>,
    pub ping_success: Option<bool>,
    pub signal_strength: Option<f64>,
    pub signal_quality: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Conflicting evidence: counted as a sample, but neither received nor lost.
    Neutral,
}

impl Probe {
    /// Source id if present and not the `"Unknown"` sentinel.
    #[must_use]
    pub fn valid_source(&self) -> Option<&str> {
        self.source_id
            .as_deref()
            .filter(|s| !s.is_empty() && *s != UNKNOWN_SOURCE)
    }

    /// Success when `pingSuccess` is true or a real source was identified;
    /// failure when `pingSuccess` is false, or it is absent and no source was
    /// identified. A probe carrying both signals (explicit false plus a real
    /// source) is neutral.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        let has_source = self.valid_source().is_some();
        let success = self.ping_success == Some(true) || has_source;
        let failure = self.ping_success == Some(false)
            || (self.ping_success != Some(true) && !has_source);

        match (success, failure) {
            (true, false) => Outcome::Success,
            (false, true) => Outcome::Failure,
            _ => Outcome::Neutral,
        }
    }
}

/// Wire shape accepted at the ingest boundary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProbe {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default, alias = "lat", deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(
        default,
        alias = "lon",
        alias = "lng",
        deserialize_with = "lenient_f64"
    )]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub source_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ping_success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub signal_strength: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub signal_quality: Option<f64>,
}

impl RawProbe {
    /// Canonicalize, or `None` when the probe cannot be placed or dated.
    #[must_use]
    pub fn into_probe(self) -> Option<Probe> {
        let latitude = self.latitude.filter(|v| v.is_finite() && (-90.0..=90.0).contains(v))?;
        let longitude = self
            .longitude
            .filter(|v| v.is_finite() && (-180.0..=180.0).contains(v))?;
        let (timestamp_raw, timestamp) = parse_timestamp(self.timestamp.as_ref()?)?;

        let id = match self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        Some(Probe {
            id,
            latitude,
            longitude,
            timestamp_raw,
            timestamp,
            source_id: self.source_id.filter(|s| !s.is_empty()),
            source_name: self.source_name.filter(|s| !s.is_empty()),
            ping_success: self.ping_success,
            signal_strength: self.signal_strength.filter(|v| v.is_finite()),
            signal_quality: self.signal_quality.filter(|v| v.is_finite()),
        })
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<(String, DateTime<Utc>)> {
    match value {
        serde_json::Value::String(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw.trim()).ok()?;
            Some((raw.clone(), parsed.with_timezone(&Utc)))
        }
        serde_json::Value::Number(n) => {
            let millis = n.as_i64()?;
            let parsed = DateTime::<Utc>::from_timestamp_millis(millis)?;
            Some((n.to_string(), parsed))
        }
        _ => None,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Strings and other scalars as text; arrays, objects and null as `None`.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Only a JSON boolean counts; anything else leaves the outcome to the
/// source rule.
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        _ => None,
    })
}

/// Result of normalizing one request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub probes: Vec<Probe>,
    /// Items in the body, malformed ones included.
    pub total: usize,
    /// Items dropped: unparseable, missing or out-of-range coordinates,
    /// missing or unparseable timestamp.
    pub malformed: usize,
}

/// Normalize a request body: either a JSON array of probes or an object with
/// a `pings` array. Individual bad items are counted, not fatal.
///
/// # Errors
///
/// Returns [`CoreError::InvalidBatch`] if the body has neither shape.
pub fn normalize_batch(body: serde_json::Value) -> Result<NormalizedBatch, CoreError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("pings") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(CoreError::InvalidBatch(
                    "expected an array of pings or an object with a \"pings\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(CoreError::InvalidBatch(
                "request body must be a JSON array or object".to_string(),
            ))
        }
    };

    let total = items.len();
    let probes: Vec<Probe> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawProbe>(item).ok())
        .filter_map(RawProbe::into_probe)
        .collect();

    Ok(NormalizedBatch {
        malformed: total - probes.len(),
        total,
        probes,
    })
}
