//! Statistics key catalog
//!
//! The catalog lists the keys requested when a caller asks for "all" stats
//! and declares how each returned value is interpreted. It is immutable once
//! built and shared between operations through an `Arc`.

use crate::value::{KeyTable, Value, ValueKind};
use crate::error::Result;

/// General player statistics known to every platform
const GENERAL_KEYS: &[&str] = &[
    "accuracy", "deaths", "dogr", "dogt", "elo", "elo0", "elo1", "form", "games", "goldedition",
    "kills", "level", "losses", "rank", "sc_assault", "sc_award", "sc_bonus", "sc_demo",
    "sc_general", "sc_objective", "sc_recon", "sc_squad", "sc_support", "sc_team", "sc_vehicle",
    "score", "slevel", "spm", "spm0", "spm1", "srank", "sveteran", "teamkills", "time", "udogt",
    "veteran", "webstats", "webvet", "wins",
];

#[derive(Debug, Clone, PartialEq)]
pub struct StatsCatalog {
    table: KeyTable,
}

impl StatsCatalog {
    /// Empty catalog decoding every value as `fallback`
    pub fn new(fallback: ValueKind) -> Self {
        Self {
            table: KeyTable::new(fallback),
        }
    }

    pub fn with_key(mut self, key: &str, kind: ValueKind) -> Self {
        self.insert(key, kind);
        self
    }

    pub fn insert(&mut self, key: &str, kind: ValueKind) {
        self.table.insert(key, kind);
    }

    /// Keys requested when the caller does not name any
    pub fn keys(&self) -> Vec<String> {
        self.table.keys().map(str::to_string).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.table.keys().next().is_none()
    }

    pub fn kind_of(&self, key: &str) -> ValueKind {
        self.table.kind_of(key)
    }

    pub fn decode(&self, key: &str, raw: &str) -> Result<Value> {
        self.table.decode(key, raw)
    }
}

impl Default for StatsCatalog {
    fn default() -> Self {
        let mut catalog = Self::new(ValueKind::Float);
        for key in GENERAL_KEYS {
            catalog.insert(key, ValueKind::Float);
        }
        catalog
    }
}
