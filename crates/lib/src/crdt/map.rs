//! Map snapshot: string keys to JSON values, last writer wins.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

use super::{Snapshot, TimedMap, unexpected_operation};
use crate::{
    Result,
    datatypes::DatatypeError,
    operations::{OpBody, Operation},
    types::{DatatypeType, Timestamp},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapSnapshot {
    map: TimedMap<Json>,
}

impl MapSnapshot {
    /// Local put. Returns the value it replaced, if any.
    pub fn put(&mut self, key: &str, value: Json, ts: Timestamp) -> Result<Option<Json>> {
        if value.is_null() {
            return Err(DatatypeError::illegal_parameters(format!(
                "cannot put null at '{key}'; use remove"
            ))
            .into());
        }
        Ok(self.map.put(key, value, ts).removed)
    }

    /// Local remove. Returns the removed value.
    pub fn remove(&mut self, key: &str, ts: Timestamp) -> Result<Json> {
        Ok(self.map.remove_local(key, ts)?)
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.map.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.keys().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Tombstoned keys and their delete timestamps.
    pub fn tombstones(&self) -> Vec<(String, Timestamp)> {
        self.map
            .tombstones()
            .map(|(k, ts)| (k.to_string(), ts))
            .collect()
    }
}

impl Snapshot for MapSnapshot {
    const TYPE: DatatypeType = DatatypeType::Map;

    fn execute_remote(&mut self, op: &Operation) -> Result<()> {
        let ts = op.timestamp();
        match &op.body {
            OpBody::Put { key, value } => {
                self.map.put(key, value.clone(), ts);
                Ok(())
            }
            OpBody::Remove { key } => {
                self.map.remove_remote(key, ts);
                Ok(())
            }
            _ => Err(unexpected_operation(Self::TYPE, op)),
        }
    }

    fn to_json(&self) -> Json {
        let map: JsonMap<String, Json> = self
            .map
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Json::Object(map)
    }
}
