//! In-memory persistence.
//!
//! Suitable for tests, development and single-process servers. The whole
//! state can be saved to and loaded from a JSON file.

use std::{collections::BTreeMap, path::Path};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::Persistence;
use crate::{
    Error, Result,
    server::{
        ServerError,
        records::{ClientRecord, CollectionRecord, DatatypeRecord, OperationRecord, SnapshotRecord},
    },
    types::{CheckPoint, Cuid, Duid},
};

/// The current persistence file format version.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

fn key_index(collection_num: u32, key: &str) -> String {
    format!("{collection_num}/{key}")
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    #[serde(default)]
    collections: BTreeMap<String, CollectionRecord>,
    #[serde(default)]
    clients: BTreeMap<Cuid, ClientRecord>,
    #[serde(default)]
    datatypes: BTreeMap<Duid, DatatypeRecord>,
    /// `"{collection_num}/{key}"` to the datatype registered under it
    #[serde(default)]
    keys: BTreeMap<String, Duid>,
    #[serde(default)]
    operations: BTreeMap<Duid, Vec<OperationRecord>>,
    #[serde(default)]
    snapshots: BTreeMap<Duid, SnapshotRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    tables: RwLock<Tables>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Save the whole state to `path` as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let tables = self.tables.read().await.clone();
        let json = serde_json::to_string_pretty(&tables)?;
        tokio::fs::write(path.as_ref(), json).await?;
        debug!(path = %path.as_ref().display(), "saved server state");
        Ok(())
    }

    /// Load state saved by [`Self::save_to_file`]. A missing file yields an
    /// empty store.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(json) => {
                let tables: Tables = serde_json::from_str(&json).map_err(|e| -> Error {
                    ServerError::DbDecode {
                        reason: format!("{}: {e}", path.as_ref().display()),
                    }
                    .into()
                })?;
                Ok(Self {
                    tables: RwLock::new(tables),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of stored operations of `duid`.
    pub async fn operation_count(&self, duid: &Duid) -> usize {
        self.tables
            .read()
            .await
            .operations
            .get(duid)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionRecord>> {
        Ok(self.tables.read().await.collections.get(name).cloned())
    }

    async fn insert_collection(&self, name: &str, created_at: String) -> Result<CollectionRecord> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.collections.get(name) {
            return Ok(existing.clone());
        }
        let num = tables.collections.values().map(|c| c.num).max().unwrap_or(0) + 1;
        let record = CollectionRecord {
            name: name.to_string(),
            num,
            created_at,
        };
        tables.collections.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn get_client(&self, cuid: &Cuid) -> Result<Option<ClientRecord>> {
        Ok(self.tables.read().await.clients.get(cuid).cloned())
    }

    async fn upsert_client(&self, record: ClientRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.clients.get_mut(&record.cuid) {
            Some(existing) => {
                existing.alias = record.alias;
                existing.updated_at = record.updated_at;
            }
            None => {
                tables.clients.insert(record.cuid, record);
            }
        }
        Ok(())
    }

    async fn get_checkpoint(&self, cuid: &Cuid, duid: &Duid) -> Result<Option<CheckPoint>> {
        Ok(self
            .tables
            .read()
            .await
            .clients
            .get(cuid)
            .and_then(|c| c.checkpoints.get(duid).copied()))
    }

    async fn update_checkpoint(
        &self,
        cuid: &Cuid,
        duid: &Duid,
        checkpoint: CheckPoint,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let client = tables
            .clients
            .get_mut(cuid)
            .ok_or_else(|| ServerError::NoResource {
                reason: format!("no client {cuid}"),
            })?;
        client.checkpoints.insert(*duid, checkpoint);
        Ok(())
    }

    async fn delete_checkpoint(&self, cuid: &Cuid, duid: &Duid) -> Result<()> {
        if let Some(client) = self.tables.write().await.clients.get_mut(cuid) {
            client.checkpoints.remove(duid);
        }
        Ok(())
    }

    async fn get_datatype_by_key(
        &self,
        collection_num: u32,
        key: &str,
    ) -> Result<Option<DatatypeRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .get(&key_index(collection_num, key))
            .and_then(|duid| tables.datatypes.get(duid))
            .cloned())
    }

    async fn get_datatype(&self, duid: &Duid) -> Result<Option<DatatypeRecord>> {
        Ok(self.tables.read().await.datatypes.get(duid).cloned())
    }

    async fn update_datatype(&self, record: DatatypeRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .keys
            .insert(key_index(record.collection_num, &record.key), record.duid);
        tables.datatypes.insert(record.duid, record);
        Ok(())
    }

    async fn insert_operations(&self, operations: Vec<OperationRecord>) -> Result<()> {
        let mut tables = self.tables.write().await;
        for record in operations {
            let log = tables.operations.entry(record.duid).or_default();
            if log.last().is_some_and(|last| last.sseq >= record.sseq) {
                return Err(ServerError::db_query(format!(
                    "operation {} of {} is out of order",
                    record.sseq, record.duid
                ))
                .into());
            }
            log.push(record);
        }
        Ok(())
    }

    async fn get_operations(
        &self,
        duid: &Duid,
        from: u64,
        to: u64,
    ) -> Result<Vec<OperationRecord>> {
        let tables = self.tables.read().await;
        let Some(log) = tables.operations.get(duid) else {
            return Ok(Vec::new());
        };
        let start = log.partition_point(|r| r.sseq < from);
        Ok(log[start..]
            .iter()
            .take_while(|r| r.sseq <= to)
            .cloned()
            .collect())
    }

    async fn get_latest_snapshot(&self, duid: &Duid) -> Result<Option<SnapshotRecord>> {
        Ok(self.tables.read().await.snapshots.get(duid).cloned())
    }

    async fn insert_snapshot(&self, record: SnapshotRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .snapshots
            .get(&record.duid)
            .is_some_and(|latest| latest.sseq >= record.sseq)
        {
            return Ok(());
        }
        tables.snapshots.insert(record.duid, record);
        Ok(())
    }
}
