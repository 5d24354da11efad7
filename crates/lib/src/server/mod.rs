//!
//! The push-pull server.
//!
//! `Server` registers clients and processes push-pull requests. Every pack is
//! handled in its own task under a per-datatype lock, so packs of different
//! datatypes proceed concurrently while operations of one datatype receive
//! server sequences in a single total order.
//!
//! Storage, locking, change notification and wall time are pluggable through
//! the [`Persistence`], [`Locker`], [`Notifier`] and [`Clock`] traits.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub mod errors;
pub mod locker;
pub mod notifier;
pub mod persistence;
pub mod pushpull;
pub mod records;
pub mod snapshot;

pub use errors::ServerError;
pub use locker::{LocalLocker, LockToken, Locker};
pub use notifier::{BroadcastNotifier, NoopNotifier, Notifier};
pub use persistence::{InMemoryPersistence, Persistence};
pub use snapshot::{BuiltSnapshot, SnapshotManager};

use self::{
    pushpull::PushPullHandler,
    records::{ClientRecord, CollectionRecord},
};
use crate::{
    Result,
    clock::{Clock, SystemClock},
    constants::DEFAULT_SNAPSHOT_INTERVAL,
    pushpull::{
        ClientRequest, ClientResponse, Header, Notification, PushPullError, PushPullPack,
        PushPullRequest, PushPullResponse,
    },
};

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How long a datatype lock is held before it counts as abandoned
    pub lock_lease_ms: u64,
    /// How long a pack waits for its datatype lock
    pub lock_timeout_ms: u64,
    /// Server sequences between stored snapshots; 0 disables compaction
    pub snapshot_interval: u64,
    /// Create unknown collections on first use instead of rejecting them
    pub auto_create_collection: bool,
    /// Capacity of the in-process notification channel
    pub notification_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            lock_lease_ms: 10_000,
            lock_timeout_ms: 5_000,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            auto_create_collection: true,
            notification_capacity: 256,
        }
    }
}

impl ServerConfig {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Shared state of a [`Server`].
#[derive(Debug)]
pub(crate) struct ServerContext {
    pub config: ServerConfig,
    pub persistence: Arc<dyn Persistence>,
    pub locker: Arc<dyn Locker>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub snapshots: SnapshotManager,
}

/// Cheap-to-clone handle to a push-pull server.
#[derive(Debug, Clone)]
pub struct Server {
    inner: Arc<ServerContext>,
}

impl Server {
    /// Server with in-memory persistence, a process-local locker and
    /// in-process notifications.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_persistence(config, Arc::new(InMemoryPersistence::new()))
    }

    /// Like [`Server::new`] but storing into `persistence`.
    pub fn with_persistence(config: ServerConfig, persistence: Arc<dyn Persistence>) -> Self {
        let locker = Arc::new(LocalLocker::new(config.lock_lease(), config.lock_timeout()));
        let notifier = Arc::new(BroadcastNotifier::new(config.notification_capacity));
        Self::with_parts(config, persistence, locker, notifier, Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: ServerConfig,
        persistence: Arc<dyn Persistence>,
        locker: Arc<dyn Locker>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let snapshots = SnapshotManager::new(Arc::clone(&persistence), Arc::clone(&clock));
        Self {
            inner: Arc::new(ServerContext {
                config,
                persistence,
                locker,
                notifier,
                clock,
                snapshots,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn persistence(&self) -> &Arc<dyn Persistence> {
        &self.inner.persistence
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.inner.snapshots
    }

    /// Receiver of every change notification published from now on, when the
    /// notifier supports in-process subscribers.
    pub fn subscribe_notifications(&self) -> Option<broadcast::Receiver<(String, Notification)>> {
        self.inner.notifier.subscribe()
    }

    async fn collection(&self, name: &str) -> Result<CollectionRecord> {
        let persistence = &self.inner.persistence;
        if let Some(collection) = persistence.get_collection(name).await? {
            return Ok(collection);
        }
        if !self.inner.config.auto_create_collection {
            return Err(ServerError::NoResource {
                reason: format!("no collection '{name}'"),
            }
            .into());
        }
        let collection = persistence
            .insert_collection(name, self.inner.clock.now_rfc3339())
            .await?;
        info!(collection = name, num = collection.num, "collection created");
        Ok(collection)
    }

    /// Register the client of `request.header`, or refresh it when known.
    pub async fn process_client(&self, request: ClientRequest) -> Result<ClientResponse> {
        let header = request.header;
        let collection = self.collection(&header.collection).await?;
        let now = self.inner.clock.now_rfc3339();
        let persistence = &self.inner.persistence;

        match persistence.get_client(&header.cuid).await? {
            Some(existing) if existing.collection_num != collection.num => {
                return Err(ServerError::NoPermission {
                    reason: format!("client {} belongs to another collection", header.cuid),
                }
                .into());
            }
            Some(_) => {}
            None => info!(
                cuid = %header.cuid,
                alias = %header.alias,
                collection = %header.collection,
                "client registered"
            ),
        }
        let record = ClientRecord {
            cuid: header.cuid,
            alias: header.alias.clone(),
            collection_num: collection.num,
            checkpoints: Default::default(),
            created_at: now.clone(),
            updated_at: now,
        };
        // checkpoints written by concurrent push-pulls must not be replaced
        persistence.upsert_client(record).await?;
        Ok(ClientResponse {
            header,
            collection_num: collection.num,
        })
    }

    /// Process every pack of `request` concurrently. Failures of single packs
    /// are reported as error packs; the response holds one pack per request
    /// pack, in order.
    pub async fn process_push_pull(&self, request: PushPullRequest) -> Result<PushPullResponse> {
        let PushPullRequest { header, packs } = request;
        debug!(
            cuid = %header.cuid,
            collection = %header.collection,
            packs = packs.len(),
            "push-pull request"
        );

        let prepared = self.prepare(&header).await;
        let (collection, client) = match prepared {
            Ok(found) => found,
            Err(err) => {
                warn!(cuid = %header.cuid, error = %err, "push-pull rejected");
                let packs = packs
                    .iter()
                    .map(|pack| PushPullPack::error_response(pack, &err))
                    .collect();
                return Ok(PushPullResponse { header, packs });
            }
        };

        let handles: Vec<_> = packs
            .iter()
            .cloned()
            .map(|pack| {
                let handler = PushPullHandler::new(
                    Arc::clone(&self.inner),
                    collection.clone(),
                    client.clone(),
                );
                tokio::spawn(handler.process(pack))
            })
            .collect();

        let mut responses = Vec::with_capacity(handles.len());
        for (handle, request_pack) in handles.into_iter().zip(&packs) {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(join_err) => {
                    let err: crate::Error = PushPullError::AbortionOfServer {
                        reason: format!("push-pull task failed: {join_err}"),
                    }
                    .into();
                    responses.push(PushPullPack::error_response(request_pack, &err));
                }
            }
        }
        Ok(PushPullResponse {
            header,
            packs: responses,
        })
    }

    async fn prepare(&self, header: &Header) -> Result<(CollectionRecord, ClientRecord)> {
        let collection = self.collection(&header.collection).await?;
        let client = self
            .inner
            .persistence
            .get_client(&header.cuid)
            .await?
            .filter(|c| c.collection_num == collection.num)
            .ok_or_else(|| ServerError::NoResource {
                reason: format!(
                    "client {} is not registered in '{}'",
                    header.cuid, header.collection
                ),
            })?;
        Ok((collection, client))
    }
}
