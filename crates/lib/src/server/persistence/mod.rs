//! Storage used by the push-pull server.
//!
//! The server calls these methods in a fixed order inside one commit:
//! operations first, then the datatype record, then the client checkpoint.
//! Implementations must make that triple atomic per datatype, which the
//! server's per-key lock makes straightforward for single-process stores.

use std::fmt::Debug;

use async_trait::async_trait;

mod in_memory;

pub use in_memory::InMemoryPersistence;

use super::records::{
    ClientRecord, CollectionRecord, DatatypeRecord, OperationRecord, SnapshotRecord,
};
use crate::{
    Result,
    types::{CheckPoint, Cuid, Duid},
};

#[async_trait]
pub trait Persistence: Send + Sync + Debug {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionRecord>>;

    /// Create the collection `name`, or return it when it already exists.
    async fn insert_collection(&self, name: &str, created_at: String) -> Result<CollectionRecord>;

    async fn get_client(&self, cuid: &Cuid) -> Result<Option<ClientRecord>>;

    /// Insert `record` when the client is unknown. For a known client only
    /// the alias and `updated_at` are refreshed; stored checkpoints survive.
    async fn upsert_client(&self, record: ClientRecord) -> Result<()>;

    async fn get_checkpoint(&self, cuid: &Cuid, duid: &Duid) -> Result<Option<CheckPoint>>;

    /// Store the checkpoint of a registered client.
    async fn update_checkpoint(&self, cuid: &Cuid, duid: &Duid, checkpoint: CheckPoint)
    -> Result<()>;

    async fn delete_checkpoint(&self, cuid: &Cuid, duid: &Duid) -> Result<()>;

    /// The datatype currently registered under `key`, visible or not.
    async fn get_datatype_by_key(
        &self,
        collection_num: u32,
        key: &str,
    ) -> Result<Option<DatatypeRecord>>;

    async fn get_datatype(&self, duid: &Duid) -> Result<Option<DatatypeRecord>>;

    /// Insert or replace a datatype record. The record becomes the one
    /// registered under its key.
    async fn update_datatype(&self, record: DatatypeRecord) -> Result<()>;

    async fn insert_operations(&self, operations: Vec<OperationRecord>) -> Result<()>;

    /// Operations of `duid` with `from <= sseq <= to`, ordered by sseq.
    async fn get_operations(&self, duid: &Duid, from: u64, to: u64)
    -> Result<Vec<OperationRecord>>;

    async fn get_latest_snapshot(&self, duid: &Duid) -> Result<Option<SnapshotRecord>>;

    async fn insert_snapshot(&self, record: SnapshotRecord) -> Result<()>;
}
