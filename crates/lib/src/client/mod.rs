//!
//! Client sessions owning datatypes and syncing them with a server.
//!
//! A [`Client`] registers with a server through a [`Transport`], creates or
//! subscribes datatypes by key and exchanges their operations in one
//! push-pull request per [`Client::sync`]. Realtime clients additionally
//! sync whenever the transport reports a change made by another client.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> orda::Result<()> {
//! use orda::{Client, ClientConfig, Server, ServerConfig, client::LocalTransport};
//!
//! let server = Server::new(ServerConfig::default());
//! let client = Client::new(ClientConfig::default(), LocalTransport::new(server));
//! client.connect().await?;
//!
//! let counter = client.create_counter("visits")?;
//! counter.increase(1)?;
//! client.sync().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

mod config;
pub mod errors;
#[cfg(feature = "http")]
pub mod http;
pub mod transport;

pub use config::{ClientConfig, SyncType};
pub use errors::ClientError;
#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use transport::{LocalTransport, Transport};

use crate::{
    Result,
    context::ClientContext,
    crdt::{CounterSnapshot, DocumentSnapshot, ListSnapshot, MapSnapshot, Snapshot},
    datatypes::{
        Counter, Datatype, DatatypeError, DatatypeHandlers, DatatypeState, Document, HashMap,
        List, SyncableDatatype,
    },
    pushpull::{ClientRequest, Header, PushPullRequest, topic},
    types::{Cuid, Uid},
};

struct ClientInner {
    ctx: Arc<ClientContext>,
    sync_type: SyncType,
    transport: Arc<dyn Transport>,
    datatypes: Mutex<BTreeMap<String, Arc<dyn SyncableDatatype>>>,
    connected: AtomicBool,
    /// Serializes push-pull exchanges of this client
    sync_lock: tokio::sync::Mutex<()>,
    realtime: Mutex<Option<JoinHandle<()>>>,
}

/// A client session. Cloning is cheap; clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("cuid", &self.inner.ctx.cuid)
            .field("alias", &self.inner.ctx.alias)
            .field("collection", &self.inner.ctx.collection)
            .field("transport", &self.inner.transport.transport_type())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let ctx = Arc::new(ClientContext::new(
            Uid::new(),
            config.alias,
            config.collection,
        ));
        Self {
            inner: Arc::new(ClientInner {
                ctx,
                sync_type: config.sync_type,
                transport,
                datatypes: Mutex::new(BTreeMap::new()),
                connected: AtomicBool::new(false),
                sync_lock: tokio::sync::Mutex::new(()),
                realtime: Mutex::new(None),
            }),
        }
    }

    pub fn cuid(&self) -> Cuid {
        self.inner.ctx.cuid
    }

    pub fn alias(&self) -> &str {
        &self.inner.ctx.alias
    }

    pub fn collection(&self) -> &str {
        &self.inner.ctx.collection
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn header(&self) -> Header {
        let ctx = &self.inner.ctx;
        Header::new(ctx.cuid, ctx.alias.clone(), ctx.collection.clone())
    }

    /// Register with the server and, for realtime clients, start following
    /// notifications.
    pub async fn connect(&self) -> Result<()> {
        let response = self
            .inner
            .transport
            .process_client(ClientRequest {
                header: self.header(),
            })
            .await
            .map_err(|e| ClientError::Connect {
                reason: e.to_string(),
            })?;
        self.inner.connected.store(true, Ordering::SeqCst);
        info!(
            cuid = %self.cuid(),
            alias = %self.alias(),
            collection = %self.collection(),
            collection_num = response.collection_num,
            transport = self.inner.transport.transport_type(),
            "client connected"
        );
        if self.inner.sync_type == SyncType::Realtime {
            self.start_realtime();
        }
        Ok(())
    }

    /// Stop following notifications and end the session.
    pub async fn close(&self) -> Result<()> {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Close {
                reason: format!("client '{}' is not connected", self.alias()),
            }
            .into());
        }
        if let Some(task) = self
            .inner
            .realtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        info!(cuid = %self.cuid(), alias = %self.alias(), "client closed");
        Ok(())
    }

    fn start_realtime(&self) {
        let Some(mut receiver) = self.inner.transport.notifications() else {
            warn!(
                transport = self.inner.transport.transport_type(),
                "transport delivers no notifications; sync manually"
            );
            return;
        };
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                let notification = match receiver.recv().await {
                    Ok(received) => Some(received),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "notifications lagged; syncing everything");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let client = Client { inner };
                if let Some((topic, notification)) = &notification {
                    if !client.should_sync_for(topic, notification.cuid, notification.sseq) {
                        continue;
                    }
                }
                if let Err(err) = client.sync().await {
                    warn!(cuid = %client.cuid(), error = %err, "realtime sync failed");
                }
            }
        });
        *self
            .inner
            .realtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    /// Whether a notification concerns one of this client's datatypes that is
    /// behind the server.
    fn should_sync_for(&self, topic_name: &str, author: Cuid, sseq: u64) -> bool {
        if author == self.cuid() {
            return false;
        }
        let Some(datatype) = self.datatypes().into_iter().find(|d| {
            topic(self.collection(), d.key()) == topic_name
        }) else {
            return false;
        };
        datatype.need_sync(sseq).unwrap_or(true)
    }

    fn datatypes(&self) -> Vec<Arc<dyn SyncableDatatype>> {
        self.inner
            .datatypes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of datatypes the client currently holds.
    pub fn datatype_count(&self) -> usize {
        self.inner
            .datatypes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn register<S: Snapshot>(
        &self,
        key: &str,
        state: DatatypeState,
        handlers: Option<Arc<dyn DatatypeHandlers>>,
    ) -> Result<Datatype<S>> {
        let mut datatypes = self
            .inner
            .datatypes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if datatypes.contains_key(key) {
            return Err(DatatypeError::Create {
                reason: format!("client already holds a datatype '{key}'"),
            }
            .into());
        }
        let datatype = Datatype::<S>::new(key, state, Arc::clone(&self.inner.ctx), handlers);
        datatypes.insert(key.to_string(), Arc::new(datatype.clone()));
        Ok(datatype)
    }

    /// Create a new datatype under `key`. The server rejects the create if
    /// the key is taken.
    pub fn create_datatype<S: Snapshot>(
        &self,
        key: &str,
        handlers: Option<Arc<dyn DatatypeHandlers>>,
    ) -> Result<Datatype<S>> {
        self.register(key, DatatypeState::DueToCreate, handlers)
    }

    /// Subscribe an existing datatype. Its state arrives with the next sync.
    pub fn subscribe_datatype<S: Snapshot>(
        &self,
        key: &str,
        handlers: Option<Arc<dyn DatatypeHandlers>>,
    ) -> Result<Datatype<S>> {
        self.register(key, DatatypeState::DueToSubscribe, handlers)
    }

    /// Subscribe the datatype under `key`, creating it if it does not exist.
    pub fn subscribe_or_create_datatype<S: Snapshot>(
        &self,
        key: &str,
        handlers: Option<Arc<dyn DatatypeHandlers>>,
    ) -> Result<Datatype<S>> {
        self.register(key, DatatypeState::DueToSubscribeCreate, handlers)
    }

    pub fn create_counter(&self, key: &str) -> Result<Counter> {
        self.create_datatype::<CounterSnapshot>(key, None)
    }

    pub fn subscribe_counter(&self, key: &str) -> Result<Counter> {
        self.subscribe_datatype::<CounterSnapshot>(key, None)
    }

    pub fn subscribe_or_create_counter(&self, key: &str) -> Result<Counter> {
        self.subscribe_or_create_datatype::<CounterSnapshot>(key, None)
    }

    pub fn create_map(&self, key: &str) -> Result<HashMap> {
        self.create_datatype::<MapSnapshot>(key, None)
    }

    pub fn subscribe_map(&self, key: &str) -> Result<HashMap> {
        self.subscribe_datatype::<MapSnapshot>(key, None)
    }

    pub fn subscribe_or_create_map(&self, key: &str) -> Result<HashMap> {
        self.subscribe_or_create_datatype::<MapSnapshot>(key, None)
    }

    pub fn create_list(&self, key: &str) -> Result<List> {
        self.create_datatype::<ListSnapshot>(key, None)
    }

    pub fn subscribe_list(&self, key: &str) -> Result<List> {
        self.subscribe_datatype::<ListSnapshot>(key, None)
    }

    pub fn subscribe_or_create_list(&self, key: &str) -> Result<List> {
        self.subscribe_or_create_datatype::<ListSnapshot>(key, None)
    }

    pub fn create_document(&self, key: &str) -> Result<Document> {
        Ok(Document::root(
            self.create_datatype::<DocumentSnapshot>(key, None)?,
        ))
    }

    pub fn subscribe_document(&self, key: &str) -> Result<Document> {
        Ok(Document::root(
            self.subscribe_datatype::<DocumentSnapshot>(key, None)?,
        ))
    }

    pub fn subscribe_or_create_document(&self, key: &str) -> Result<Document> {
        Ok(Document::root(
            self.subscribe_or_create_datatype::<DocumentSnapshot>(key, None)?,
        ))
    }

    fn request_state(&self, key: &str, state: DatatypeState) -> Result<()> {
        let datatype = self
            .inner
            .datatypes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| {
                DatatypeError::illegal_parameters(format!("client holds no datatype '{key}'"))
            })?;
        datatype.set_state(state)
    }

    /// Stop receiving changes of `key`. Takes effect with the next sync.
    pub fn unsubscribe(&self, key: &str) -> Result<()> {
        self.request_state(key, DatatypeState::DueToUnsubscribe)
    }

    /// Delete the datatype `key` for every client. Takes effect with the
    /// next sync.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.request_state(key, DatatypeState::DueToDelete)
    }

    /// Push local operations of every datatype and pull remote ones.
    ///
    /// Errors of individual datatypes are delivered to their
    /// [`DatatypeHandlers`] and logged; only a failed exchange is returned.
    pub async fn sync(&self) -> Result<()> {
        let _guard = self.inner.sync_lock.lock().await;
        let datatypes = self.datatypes();
        let mut packs = Vec::with_capacity(datatypes.len());
        for datatype in &datatypes {
            if datatype.state()?.is_closed() {
                continue;
            }
            packs.push(datatype.create_push_pull_pack()?);
        }
        if packs.is_empty() {
            return Ok(());
        }
        debug!(cuid = %self.cuid(), packs = packs.len(), "sending push-pull");

        let request = PushPullRequest {
            header: self.header(),
            packs,
        };
        let response = self
            .inner
            .transport
            .process_push_pull(request)
            .await
            .map_err(|e| ClientError::Sync {
                reason: e.to_string(),
            })?;

        for pack in response.packs {
            let Some(datatype) = datatypes.iter().find(|d| d.key() == pack.key) else {
                warn!(key = %pack.key, "response for unknown datatype");
                continue;
            };
            for err in datatype.apply_push_pull_pack(pack)? {
                warn!(key = %datatype.key(), code = err.code(), error = %err, "push-pull failed");
            }
        }

        let mut held = self
            .inner
            .datatypes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for datatype in &datatypes {
            if datatype.state()?.is_closed() {
                debug!(key = %datatype.key(), "releasing closed datatype");
                held.remove(datatype.key());
            }
        }
        Ok(())
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(task) = self
            .realtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
