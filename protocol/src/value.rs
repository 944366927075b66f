//! Typed interpretation of textual field values

use crate::error::{Error, Result};
use crate::payload::Payload;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

/// Target type of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Fractional days since 2008-01-01 UTC
    Timestamp,
}

/// A decoded field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Interprets `raw` as `kind`, returning `None` if it does not fit
    pub fn parse(kind: ValueKind, raw: &str) -> Option<Self> {
        match kind {
            ValueKind::Text => Some(Self::Text(unquote(raw))),
            ValueKind::Integer => parse_integer(raw.trim()).map(Self::Integer),
            ValueKind::Float => parse_float(raw.trim()).map(Self::Float),
            ValueKind::Boolean => parse_boolean(raw.trim()).map(Self::Boolean),
            ValueKind::Timestamp => parse_float(raw.trim())
                .and_then(days_to_timestamp)
                .map(Self::Timestamp),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// Strips surrounding quotes and percent-encoding from a raw value
pub fn unquote(raw: &str) -> String {
    percent_decode_str(raw.trim_matches('"'))
        .decode_utf8_lossy()
        .into_owned()
}

fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    // Some backends render integral counters as "12.0"
    let v = raw.parse::<f64>().ok()?;
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Start of the day-count epoch used by timestamp fields
pub fn epoch_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2008, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Converts fractional days since the epoch into an instant
pub fn days_to_timestamp(days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() {
        return None;
    }
    let millis = (days * 86_400_000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    epoch_start().checked_add_signed(TimeDelta::try_milliseconds(millis as i64)?)
}

/// Per-key value kinds with a fallback for unknown keys
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTable {
    kinds: IndexMap<String, ValueKind>,
    fallback: ValueKind,
}

impl KeyTable {
    pub fn new(fallback: ValueKind) -> Self {
        Self {
            kinds: IndexMap::new(),
            fallback,
        }
    }

    pub fn from_static(entries: &[(&str, ValueKind)], fallback: ValueKind) -> Self {
        let mut table = Self::new(fallback);
        for (key, kind) in entries {
            table.insert(key, *kind);
        }
        table
    }

    pub fn insert(&mut self, key: &str, kind: ValueKind) {
        self.kinds.insert(key.to_string(), kind);
    }

    pub fn kind_of(&self, key: &str) -> ValueKind {
        self.kinds.get(key).copied().unwrap_or(self.fallback)
    }

    pub fn fallback(&self) -> ValueKind {
        self.fallback
    }

    /// Keys with an explicit kind, in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn decode(&self, key: &str, raw: &str) -> Result<Value> {
        let kind = self.kind_of(key);
        Value::parse(kind, raw).ok_or_else(|| Error::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            kind,
        })
    }

    /// Decodes every field of a flat record, keyed by its rendered path
    pub fn decode_record(&self, record: &Payload) -> Result<IndexMap<String, Value>> {
        record
            .iter()
            .map(|(path, raw)| {
                let key = path.to_string();
                let value = self.decode(&key, raw)?;
                Ok((key, value))
            })
            .collect()
    }
}
