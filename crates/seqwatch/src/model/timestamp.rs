//! Serde helpers for backend timestamps.
//!
//! The workflow service emits zone-less local timestamps
//! (`2024-05-01T10:05:00`), sometimes with fractional seconds. Offsets in
//! RFC 3339 form are accepted as well and normalised to UTC.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serializer};

/// Wire format used when encoding timestamps.
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a backend timestamp in any of the accepted shapes.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.naive_utc()))
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(WIRE_FORMAT).to_string()
}

pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(ts))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(|e| {
        serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e))
    })
}

/// Same as the parent module, for optional fields.
pub mod option {
    use super::*;

    pub fn serialize<S>(ts: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ts {
            Some(ts) => serializer.serialize_some(&format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw).map(Some).map_err(|e| {
                serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e))
            }),
        }
    }
}
