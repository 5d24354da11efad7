use std::{sync::Arc, time::Duration};

use orda::{
    Client, ClientConfig, Server, ServerConfig, SyncType, SystemClock,
    client::LocalTransport,
    operations::{OpBody, Operation},
    server::{BroadcastNotifier, InMemoryPersistence, LocalLocker},
    types::{OperationId, Timestamp, Uid},
};

pub const COLLECTION: &str = "it";

pub fn server() -> Server {
    Server::new(ServerConfig::default())
}

/// Server whose locker is reachable from the test.
pub fn server_with_locker(timeout: Duration) -> (Server, Arc<LocalLocker>) {
    let locker = Arc::new(LocalLocker::new(Duration::from_secs(10), timeout));
    let server = Server::with_parts(
        ServerConfig::default(),
        Arc::new(InMemoryPersistence::new()),
        locker.clone(),
        Arc::new(BroadcastNotifier::default()),
        Arc::new(SystemClock),
    );
    (server, locker)
}

pub async fn connected_client(server: &Server, alias: &str) -> Client {
    connected_client_with(server, alias, SyncType::Manual).await
}

pub async fn connected_client_with(server: &Server, alias: &str, sync_type: SyncType) -> Client {
    let client = Client::new(
        ClientConfig::new(COLLECTION, alias).with_sync_type(sync_type),
        LocalTransport::new(server.clone()),
    );
    client.connect().await.expect("Failed to connect client");
    client
}

/// Sync every client in order, twice, so each sees every other's pushes.
pub async fn sync_all(clients: &[&Client]) {
    for _ in 0..2 {
        for client in clients {
            client.sync().await.expect("Failed to sync");
        }
    }
}

pub fn cuid(name: &str) -> Uid {
    Uid::from_slice(name.as_bytes())
}

pub fn ts(lamport: u64, name: &str) -> Timestamp {
    Timestamp::new(0, lamport, cuid(name), 0)
}

/// Remote operation issued by `name` at `lamport`.
pub fn remote_op(name: &str, lamport: u64, body: OpBody) -> Operation {
    let mut id = OperationId::new(cuid(name));
    id.sync_lamport(lamport - 1);
    Operation::new(id.next(), body)
}
