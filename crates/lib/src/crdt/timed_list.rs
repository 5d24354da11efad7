//! Replicated growable array with tombstones.
//!
//! Nodes live in an arena keyed by their order timestamp and are chained from
//! a sentinel head at [`Timestamp::head`]. Deleted nodes stay linked so remote
//! operations can still anchor on them.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::timed_map::TimedValue;
use crate::{datatypes::DatatypeError, types::Timestamp};

#[derive(Debug, Clone, PartialEq)]
struct ListNode<V> {
    value: TimedValue<V>,
    prev: Timestamp,
    next: Option<Timestamp>,
}

/// Result of updating one list position.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<V> {
    /// The new value won and this is the value it replaced
    Applied(V),
    /// The new value lost, or the node was already deleted
    Rejected(V),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedList<V> {
    nodes: HashMap<Timestamp, ListNode<V>>,
    size: usize,
}

impl<V> Default for TimedList<V> {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            Timestamp::head(),
            ListNode {
                value: TimedValue::tomb(Timestamp::head()),
                prev: Timestamp::head(),
                next: None,
            },
        );
        Self { nodes, size: 0 }
    }
}

impl<V: Clone> TimedList<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Walk every node after the head, tombstones included.
    fn walk(&self) -> impl Iterator<Item = (Timestamp, &ListNode<V>)> {
        let mut cursor = self.nodes.get(&Timestamp::head()).and_then(|h| h.next);
        std::iter::from_fn(move || {
            let key = cursor?;
            let node = self.nodes.get(&key)?;
            cursor = node.next;
            Some((key, node))
        })
    }

    fn live(&self) -> impl Iterator<Item = (Timestamp, &V)> {
        self.walk()
            .filter_map(|(key, node)| node.value.value.as_ref().map(|v| (key, v)))
    }

    /// Visible values in order.
    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.live().map(|(_, v)| v)
    }

    pub fn to_vec(&self) -> Vec<V> {
        self.iter().cloned().collect()
    }

    pub fn get(&self, pos: usize) -> Option<&V> {
        self.iter().nth(pos)
    }

    /// Up to `count` visible values starting at `pos`.
    pub fn get_many(&self, pos: usize, count: usize) -> Result<Vec<V>, DatatypeError> {
        self.check_range(pos, count)?;
        Ok(self.iter().skip(pos).take(count).cloned().collect())
    }

    /// Order timestamp of the node holding the `pos`-th visible value.
    pub fn target_at(&self, pos: usize) -> Option<Timestamp> {
        self.live().nth(pos).map(|(key, _)| key)
    }

    /// Whether the node with this order timestamp exists and is deleted.
    pub fn is_tomb(&self, target: &Timestamp) -> Option<bool> {
        self.nodes.get(target).map(|n| n.value.is_tomb())
    }

    /// Timestamp of the last write or delete on the node.
    pub fn value_ts(&self, target: &Timestamp) -> Option<Timestamp> {
        self.nodes.get(target).map(|n| n.value.ts)
    }

    fn check_range(&self, pos: usize, count: usize) -> Result<(), DatatypeError> {
        if count == 0 || pos.saturating_add(count) > self.size {
            return Err(DatatypeError::illegal_parameters(format!(
                "range {pos}..{} out of bounds for list of {}",
                pos.saturating_add(count),
                self.size
            )));
        }
        Ok(())
    }

    /// Anchor for a local insert at `pos`: the head or the previous visible node.
    pub fn anchor_for_insert(&self, pos: usize) -> Result<Timestamp, DatatypeError> {
        if pos > self.size {
            return Err(DatatypeError::illegal_parameters(format!(
                "insert position {pos} out of bounds for list of {}",
                self.size
            )));
        }
        match pos {
            0 => Ok(Timestamp::head()),
            _ => self
                .target_at(pos - 1)
                .ok_or_else(|| DatatypeError::corruption("list size out of sync")),
        }
    }

    /// Insert `values` one after another, the first one right after `target`.
    ///
    /// Each value is placed after its anchor but behind any neighbour with a
    /// newer order timestamp, so concurrent inserts on one anchor end up in
    /// the same order on every replica.
    pub fn insert_after(
        &mut self,
        target: Timestamp,
        values: Vec<(Timestamp, V)>,
    ) -> Result<(), DatatypeError> {
        if !self.nodes.contains_key(&target) {
            return Err(DatatypeError::NoTarget {
                reason: format!("no list node {target} to insert after"),
            });
        }
        let mut anchor = target;
        for (key, value) in values {
            if self.nodes.contains_key(&key) {
                // replayed insert
                anchor = key;
                continue;
            }
            let mut prev = anchor;
            let mut next = self.nodes.get(&prev).and_then(|n| n.next);
            while let Some(candidate) = next {
                if candidate < key {
                    break;
                }
                prev = candidate;
                next = self.nodes.get(&candidate).and_then(|n| n.next);
            }
            self.link(prev, key, TimedValue::live(value, key), next);
            self.size += 1;
            anchor = key;
        }
        Ok(())
    }

    fn link(
        &mut self,
        prev: Timestamp,
        key: Timestamp,
        value: TimedValue<V>,
        next: Option<Timestamp>,
    ) {
        if let Some(p) = self.nodes.get_mut(&prev) {
            p.next = Some(key);
        }
        if let Some(n) = next.and_then(|n| self.nodes.get_mut(&n)) {
            n.prev = key;
        }
        self.nodes.insert(key, ListNode { value, prev, next });
    }

    /// Local delete of `count` visible values from `pos`. Returns the deleted
    /// nodes' order timestamps and values.
    pub fn delete_at(
        &mut self,
        pos: usize,
        count: usize,
        ts: Timestamp,
    ) -> Result<Vec<(Timestamp, V)>, DatatypeError> {
        self.check_range(pos, count)?;
        let targets: Vec<Timestamp> = self.live().skip(pos).take(count).map(|(k, _)| k).collect();
        let removed = self.delete_targets(&targets, ts)?;
        Ok(targets.into_iter().zip(removed).filter_map(|(t, v)| v.map(|v| (t, v))).collect())
    }

    /// Delete nodes by order timestamp. A delete always wins over concurrent
    /// updates; the node's timestamp keeps the maximum seen.
    pub fn delete_targets(
        &mut self,
        targets: &[Timestamp],
        ts: Timestamp,
    ) -> Result<Vec<Option<V>>, DatatypeError> {
        if let Some(missing) = targets.iter().find(|t| t.is_head() || !self.nodes.contains_key(t)) {
            return Err(DatatypeError::NoTarget {
                reason: format!("no list node {missing} to delete"),
            });
        }
        let mut removed = Vec::with_capacity(targets.len());
        for target in targets {
            let node = self
                .nodes
                .get_mut(target)
                .ok_or_else(|| DatatypeError::corruption("list node vanished"))?;
            let old = node.value.make_tomb(ts);
            if old.is_some() {
                self.size -= 1;
            }
            removed.push(old);
        }
        Ok(removed)
    }

    /// Local update of consecutive visible values from `pos`. Returns the
    /// targets and replaced values.
    pub fn update_at(
        &mut self,
        pos: usize,
        values: Vec<(Timestamp, V)>,
    ) -> Result<Vec<(Timestamp, UpdateOutcome<V>)>, DatatypeError> {
        self.check_range(pos, values.len())?;
        let targets: Vec<Timestamp> = self
            .live()
            .skip(pos)
            .take(values.len())
            .map(|(k, _)| k)
            .collect();
        let outcomes = self.update_targets(&targets, values)?;
        Ok(targets.into_iter().zip(outcomes).collect())
    }

    /// Update nodes by order timestamp, last writer wins. Deleted nodes are
    /// never revived.
    pub fn update_targets(
        &mut self,
        targets: &[Timestamp],
        values: Vec<(Timestamp, V)>,
    ) -> Result<Vec<UpdateOutcome<V>>, DatatypeError> {
        if targets.len() != values.len() {
            return Err(DatatypeError::illegal_parameters(format!(
                "{} targets for {} values",
                targets.len(),
                values.len()
            )));
        }
        if let Some(missing) = targets.iter().find(|t| t.is_head() || !self.nodes.contains_key(t)) {
            return Err(DatatypeError::NoTarget {
                reason: format!("no list node {missing} to update"),
            });
        }
        let mut outcomes = Vec::with_capacity(values.len());
        for (target, (ts, value)) in targets.iter().zip(values) {
            let node = self
                .nodes
                .get_mut(target)
                .ok_or_else(|| DatatypeError::corruption("list node vanished"))?;
            let outcome = match node.value.value.as_mut() {
                None => {
                    node.value.ts = node.value.ts.max(ts);
                    UpdateOutcome::Rejected(value)
                }
                Some(_) if node.value.ts >= ts => UpdateOutcome::Rejected(value),
                Some(current) => {
                    let old = std::mem::replace(current, value);
                    node.value.ts = ts;
                    UpdateOutcome::Applied(old)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[derive(Serialize)]
struct ListEntryRef<'a, V> {
    key: Timestamp,
    value: &'a TimedValue<V>,
}

#[derive(Deserialize)]
struct ListEntry<V> {
    key: Timestamp,
    value: TimedValue<V>,
}

impl<V: Serialize + Clone> Serialize for TimedList<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.walk().map(|(key, node)| ListEntryRef {
            key,
            value: &node.value,
        }))
    }
}

impl<'de, V: Deserialize<'de> + Clone> Deserialize<'de> for TimedList<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries: Vec<ListEntry<V>> = Vec::deserialize(deserializer)?;
        let mut list = TimedList::default();
        let mut prev = Timestamp::head();
        for entry in entries {
            if entry.key.is_head() || list.nodes.contains_key(&entry.key) {
                return Err(serde::de::Error::custom(format!(
                    "duplicate list node {}",
                    entry.key
                )));
            }
            if !entry.value.is_tomb() {
                list.size += 1;
            }
            list.link(prev, entry.key, entry.value, None);
            prev = entry.key;
        }
        Ok(list)
    }
}
