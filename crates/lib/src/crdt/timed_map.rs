//! Last-writer-wins map keyed by string.
//!
//! Shared by the map snapshot (JSON values) and document object nodes
//! (child node keys).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{datatypes::DatatypeError, types::Timestamp};

/// A value stamped with the time of its last write. `None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue<V> {
    pub value: Option<V>,
    pub ts: Timestamp,
}

impl<V> TimedValue<V> {
    pub fn live(value: V, ts: Timestamp) -> Self {
        Self {
            value: Some(value),
            ts,
        }
    }

    pub fn tomb(ts: Timestamp) -> Self {
        Self { value: None, ts }
    }

    pub fn is_tomb(&self) -> bool {
        self.value.is_none()
    }

    /// Turn into a tombstone, keeping the greater of the two timestamps.
    pub(crate) fn make_tomb(&mut self, ts: Timestamp) -> Option<V> {
        self.ts = self.ts.max(ts);
        self.value.take()
    }
}

/// Result of a put against a [`TimedMap`].
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome<V> {
    /// Whether the incoming value won
    pub applied: bool,
    /// The losing visible value: the previous one when the put won, the
    /// incoming one when it lost.
    pub removed: Option<V>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimedMap<V> {
    entries: BTreeMap<String, TimedValue<V>>,
}

impl<V> Default for TimedMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Clone> TimedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` unless the existing entry carries a newer timestamp.
    pub fn put(&mut self, key: &str, value: V, ts: Timestamp) -> PutOutcome<V> {
        match self.entries.get_mut(key) {
            Some(existing) if existing.ts >= ts => PutOutcome {
                applied: false,
                removed: Some(value),
            },
            Some(existing) => {
                let removed = existing.value.replace(value);
                existing.ts = ts;
                PutOutcome {
                    applied: true,
                    removed,
                }
            }
            None => {
                self.entries
                    .insert(key.to_string(), TimedValue::live(value, ts));
                PutOutcome {
                    applied: true,
                    removed: None,
                }
            }
        }
    }

    /// Local remove. Fails with `NoOp` when nothing visible is stored under `key`.
    pub fn remove_local(&mut self, key: &str, ts: Timestamp) -> Result<V, DatatypeError> {
        let entry = self
            .entries
            .get_mut(key)
            .filter(|e| !e.is_tomb())
            .ok_or_else(|| DatatypeError::no_op(format!("no value to remove at '{key}'")))?;
        entry
            .make_tomb(ts)
            .ok_or_else(|| DatatypeError::corruption("live entry without value"))
    }

    /// Remote remove. Older removes never move a tombstone backwards and an
    /// unknown key still records the tombstone.
    pub fn remove_remote(&mut self, key: &str, ts: Timestamp) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(existing) if existing.is_tomb() => {
                existing.ts = existing.ts.max(ts);
                None
            }
            Some(existing) if existing.ts < ts => existing.make_tomb(ts),
            Some(_) => None,
            None => {
                self.entries.insert(key.to_string(), TimedValue::tomb(ts));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).and_then(|e| e.value.as_ref())
    }

    /// The raw entry, tombstones included.
    pub fn entry(&self, key: &str) -> Option<&TimedValue<V>> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Visible entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries
            .iter()
            .filter_map(|(k, e)| e.value.as_ref().map(|v| (k.as_str(), v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    /// Tombstoned keys with their delete timestamps.
    pub fn tombstones(&self) -> impl Iterator<Item = (&str, Timestamp)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_tomb())
            .map(|(k, e)| (k.as_str(), e.ts))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
