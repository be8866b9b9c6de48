//! Versioned warm-start state for SVI calibration.
//!
//! Keyed by `(underlying, expiry)`, each entry holds the last calibrated
//! parameters, the snapshot they came from and a version that increases
//! with every accepted update. The history is plain data owned by the
//! caller: the surface builder only reads it, and [`absorb`] writes a
//! finished run back in.
//!
//! [`absorb`]: CalibrationHistory::absorb

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;
use crate::smile::SviParameters;
use crate::surface::Surface;

/// Last calibration of one `(underlying, expiry)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub as_of: NaiveDateTime,
    pub params: SviParameters,
}

#[derive(Serialize, Deserialize)]
struct HistoryRecord<'a> {
    underlying: Cow<'a, str>,
    expiry: NaiveDate,
    #[serde(flatten)]
    entry: HistoryEntry,
}

/// Warm-start parameters keyed by underlying and expiry.
///
/// Serialized as a flat list of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationHistory {
    entries: BTreeMap<(String, NaiveDate), HistoryEntry>,
}

impl Serialize for CalibrationHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(|(underlying, expiry, entry)| HistoryRecord {
            underlying: Cow::Borrowed(underlying),
            expiry,
            entry: *entry,
        }))
    }
}

impl<'de> Deserialize<'de> for CalibrationHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let records = Vec::<HistoryRecord<'static>>::deserialize(deserializer)?;
        let mut entries = BTreeMap::new();
        for r in records {
            let key = (r.underlying.into_owned(), r.expiry);
            // Keep the highest version when a file repeats a key.
            let keep = entries
                .get(&key)
                .is_none_or(|e: &HistoryEntry| e.version < r.entry.version);
            if keep {
                entries.insert(key, r.entry);
            }
        }
        Ok(Self { entries })
    }
}

impl CalibrationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, underlying: &str, expiry: NaiveDate) -> Option<&HistoryEntry> {
        self.entries.get(&(underlying.to_string(), expiry))
    }

    /// Store a calibration and return its version.
    ///
    /// A snapshot older than the stored one is ignored and `None` returned.
    pub fn record(
        &mut self,
        underlying: &str,
        expiry: NaiveDate,
        as_of: NaiveDateTime,
        params: SviParameters,
    ) -> Option<u64> {
        let key = (underlying.to_string(), expiry);
        let version = match self.entries.get(&key) {
            Some(e) if as_of < e.as_of => return None,
            Some(e) => e.version + 1,
            None => 1,
        };
        self.entries.insert(
            key,
            HistoryEntry {
                version,
                as_of,
                params,
            },
        );
        Some(version)
    }

    /// Record every calibrated slice of `surface`; returns how many were accepted.
    pub fn absorb(&mut self, surface: &Surface) -> usize {
        surface
            .slices
            .iter()
            .filter_map(|s| self.record(&surface.underlying, s.expiry, surface.as_of, s.fit.params))
            .count()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, NaiveDate, &HistoryEntry)> {
        self.entries
            .iter()
            .map(|((u, e), entry)| (u.as_str(), *e, entry))
    }

    /// # Errors
    /// Returns [`VolSurfError::Json`](crate::VolSurfError::Json) for malformed
    /// JSON or invalid parameters.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    /// Returns [`VolSurfError::Io`](crate::VolSurfError::Io) if the file cannot
    /// be read, otherwise as [`from_json_str`](Self::from_json_str).
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// # Errors
    /// Returns [`VolSurfError::Json`](crate::VolSurfError::Json) on serialization failure.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    /// Returns [`VolSurfError::Io`](crate::VolSurfError::Io) if the file cannot
    /// be written.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
