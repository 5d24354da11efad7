//! Transport abstraction between a client and a push-pull server.
//!
//! A transport carries two request/response exchanges: client registration
//! and push-pull. Retry policy belongs to the transport; the protocol itself
//! tolerates resent requests. Transports that can observe server
//! notifications expose them for realtime clients.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    Result,
    pushpull::{ClientRequest, ClientResponse, Notification, PushPullRequest, PushPullResponse},
    server::Server,
};

/// Trait for carrying client requests to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in logs, e.g. "local" or "http".
    fn transport_type(&self) -> &'static str;

    /// Register the client with the server.
    async fn process_client(&self, request: ClientRequest) -> Result<ClientResponse>;

    /// Exchange push-pull packs with the server.
    async fn process_push_pull(&self, request: PushPullRequest) -> Result<PushPullResponse>;

    /// Notifications published by the server as `(topic, notification)`, if
    /// this transport can deliver them.
    fn notifications(&self) -> Option<broadcast::Receiver<(String, Notification)>> {
        None
    }
}

/// Transport calling a [`Server`] in the same process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    server: Server,
}

impl LocalTransport {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn transport_type(&self) -> &'static str {
        "local"
    }

    async fn process_client(&self, request: ClientRequest) -> Result<ClientResponse> {
        self.server.process_client(request).await
    }

    async fn process_push_pull(&self, request: PushPullRequest) -> Result<PushPullResponse> {
        self.server.process_push_pull(request).await
    }

    fn notifications(&self) -> Option<broadcast::Receiver<(String, Notification)>> {
        self.server.subscribe_notifications()
    }
}
