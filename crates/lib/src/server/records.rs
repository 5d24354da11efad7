//! Records kept by server persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::{
    operations::Operation,
    types::{CheckPoint, Cuid, DatatypeType, Duid},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub name: String,
    /// Number assigned at creation; datatype keys are unique per collection
    pub num: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub cuid: Cuid,
    pub alias: String,
    pub collection_num: u32,
    /// Checkpoint of every datatype the client is subscribed to
    #[serde(default)]
    pub checkpoints: BTreeMap<Duid, CheckPoint>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatatypeRecord {
    pub duid: Duid,
    pub key: String,
    pub collection_num: u32,
    #[serde(rename = "type")]
    pub datatype_type: DatatypeType,
    /// Oldest server sequence still available as an operation
    pub sseq_begin: u64,
    /// Last assigned server sequence
    pub sseq_end: u64,
    /// Cleared when the datatype is deleted
    pub visible: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl DatatypeRecord {
    pub fn new(
        duid: Duid,
        key: impl Into<String>,
        collection_num: u32,
        datatype_type: DatatypeType,
        now: String,
    ) -> Self {
        Self {
            duid,
            key: key.into(),
            collection_num,
            datatype_type,
            sseq_begin: 1,
            sseq_end: 0,
            visible: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// An operation stored at a server sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub duid: Duid,
    pub sseq: u64,
    pub operation: Operation,
}

/// Full state of a datatype after applying every operation up to `sseq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub duid: Duid,
    pub sseq: u64,
    /// Highest lamport seen in the covered operations
    pub lamport: u64,
    pub state: Json,
    pub created_at: String,
}
