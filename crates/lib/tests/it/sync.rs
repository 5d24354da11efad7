//! Clients syncing through an in-process server.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use orda::{
    Client, ClientConfig, ClientError, DatatypeHandlers, DatatypeState, SyncType,
    client::{LocalTransport, Transport},
    crdt::CounterSnapshot,
    operations::Operation,
    pushpull::{ClientRequest, ClientResponse, PushPullRequest, PushPullResponse},
    types::CheckPoint,
};
use serde_json::json;

use crate::helpers::{COLLECTION, connected_client, connected_client_with, server, sync_all};

#[tokio::test]
async fn test_counters_converge() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;

    let counter_a = a.create_counter("visits").unwrap();
    a.sync().await.unwrap();
    let counter_b = b.subscribe_counter("visits").unwrap();
    b.sync().await.unwrap();

    counter_a.increase(5).unwrap();
    counter_b.increase(3).unwrap();
    sync_all(&[&a, &b]).await;

    assert_eq!(counter_a.get().unwrap(), 8);
    assert_eq!(counter_b.get().unwrap(), 8);
    assert_eq!(counter_a.duid().unwrap(), counter_b.duid().unwrap());
}

#[tokio::test]
async fn test_concurrent_map_puts_converge() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    let map_a = a.create_map("m").unwrap();
    a.sync().await.unwrap();
    let map_b = b.subscribe_map("m").unwrap();
    b.sync().await.unwrap();

    map_a.put("k", 1).unwrap();
    map_b.put("k", 2).unwrap();
    sync_all(&[&a, &b]).await;

    // same lamport: the greater cuid wins
    let expected = if a.cuid() > b.cuid() { 1 } else { 2 };
    assert_eq!(map_a.get("k").unwrap(), Some(json!(expected)));
    assert_eq!(map_a.to_json().unwrap(), map_b.to_json().unwrap());
}

#[tokio::test]
async fn test_concurrent_list_inserts_converge() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    let list_a = a.create_list("l").unwrap();
    a.sync().await.unwrap();
    let list_b = b.subscribe_list("l").unwrap();
    b.sync().await.unwrap();

    list_a.insert(0, vec![json!("x"), json!("y")]).unwrap();
    list_b.insert(0, vec![json!("a"), json!("b")]).unwrap();
    sync_all(&[&a, &b]).await;

    assert_eq!(list_a.size().unwrap(), 4);
    assert_eq!(list_a.values().unwrap(), list_b.values().unwrap());
}

#[tokio::test]
async fn test_document_update_under_deleted_object() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    let doc_a = a.create_document("d").unwrap();
    doc_a.put_to_object("K2", json!({"E1": 1})).unwrap();
    a.sync().await.unwrap();
    let doc_b = b.subscribe_document("d").unwrap();
    b.sync().await.unwrap();
    assert_eq!(doc_b.to_json().unwrap(), json!({"K2": {"E1": 1}}));

    let k2_b = doc_b.get_from_object("K2").unwrap().unwrap();
    doc_a.remove_in_object("K2").unwrap();
    k2_b.put_to_object("E1", 2).unwrap();
    sync_all(&[&a, &b]).await;

    assert_eq!(doc_a.to_json().unwrap(), json!({}));
    assert_eq!(doc_b.to_json().unwrap(), json!({}));
    let k2_a = doc_a.datatype().snapshot().unwrap();
    assert!(k2_a.cemetery().any(|node| *node == k2_b.node()));
    assert_eq!(k2_a.to_json_at(&k2_b.node()).unwrap(), json!({"E1": 2}));
}

#[tokio::test]
async fn test_subscribe_or_create_adopts_existing() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;

    let first = a.subscribe_or_create_counter("shared").unwrap();
    first.increase(4).unwrap();
    a.sync().await.unwrap();
    assert_eq!(first.state().unwrap(), DatatypeState::Subscribed);

    let second = b.subscribe_or_create_counter("shared").unwrap();
    let local_duid = second.duid().unwrap();
    second.increase(100).unwrap();
    b.sync().await.unwrap();

    // the server's state and DUID replace the local ones
    assert_eq!(second.get().unwrap(), 4);
    assert_eq!(second.duid().unwrap(), first.duid().unwrap());
    assert_ne!(second.duid().unwrap(), local_duid);
    assert_eq!(second.checkpoint().unwrap(), CheckPoint::new(1, 0));

    second.increase(1).unwrap();
    sync_all(&[&b, &a]).await;
    assert_eq!(first.get().unwrap(), 5);
}

#[tokio::test]
async fn test_duplicate_create_reports_error() {
    #[derive(Default)]
    struct Recorder {
        codes: Mutex<Vec<u32>>,
    }
    impl DatatypeHandlers for Recorder {
        fn on_errors(&self, _key: &str, errors: &[orda::Error]) {
            self.codes
                .lock()
                .unwrap()
                .extend(errors.iter().map(orda::Error::code));
        }
    }

    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    a.create_counter("taken").unwrap();
    a.sync().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let handlers: Arc<dyn DatatypeHandlers> = recorder.clone();
    let duplicate = b
        .create_datatype::<CounterSnapshot>("taken", Some(handlers))
        .unwrap();
    b.sync().await.unwrap();

    let codes = recorder.codes.lock().unwrap().clone();
    assert_eq!(codes.len(), 1);
    assert!(orda::Error::from_code(codes[0], "").is_duplicate_key());
    assert_eq!(duplicate.state().unwrap(), DatatypeState::Unsubscribed);
    assert_eq!(b.datatype_count(), 0);

    // the refused create is not offered again
    b.sync().await.unwrap();
    assert_eq!(recorder.codes.lock().unwrap().len(), 1);
    let retry = b.create_counter("taken");
    assert!(retry.is_ok());
}

#[tokio::test]
async fn test_remote_operations_reach_handlers() {
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Operation>>,
        states: Mutex<Vec<(DatatypeState, DatatypeState)>>,
    }
    impl DatatypeHandlers for Recorder {
        fn on_state_change(&self, _key: &str, old: DatatypeState, new: DatatypeState) {
            self.states.lock().unwrap().push((old, new));
        }
        fn on_remote_operations(&self, _key: &str, operations: &[Operation]) {
            self.seen.lock().unwrap().extend_from_slice(operations);
        }
    }

    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    let counter = a.create_counter("c").unwrap();
    a.sync().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let handlers: Arc<dyn DatatypeHandlers> = recorder.clone();
    b.subscribe_datatype::<CounterSnapshot>("c", Some(handlers))
        .unwrap();
    b.sync().await.unwrap();
    counter.increase(2).unwrap();
    counter.increase(3).unwrap();
    sync_all(&[&a, &b]).await;

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.iter().filter(|op| !op.is_snapshot()).count(), 2);
    assert_eq!(
        recorder.states.lock().unwrap().as_slice(),
        &[(DatatypeState::DueToSubscribe, DatatypeState::Subscribed)]
    );
}

#[tokio::test]
async fn test_unsubscribe_and_delete() {
    let server = server();
    let a = connected_client(&server, "a").await;
    let b = connected_client(&server, "b").await;
    let counter = a.create_counter("c").unwrap();
    counter.increase(1).unwrap();
    a.sync().await.unwrap();
    let mirror = b.subscribe_counter("c").unwrap();
    b.sync().await.unwrap();

    b.unsubscribe("c").unwrap();
    b.sync().await.unwrap();
    assert_eq!(mirror.state().unwrap(), DatatypeState::Unsubscribed);
    assert_eq!(b.datatype_count(), 0);

    a.delete("c").unwrap();
    a.sync().await.unwrap();
    assert_eq!(counter.state().unwrap(), DatatypeState::Deleted);
    assert!(counter.increase(1).unwrap_err().is_validation_error());

    // the key is free again
    let fresh = b.create_counter("c").unwrap();
    b.sync().await.unwrap();
    assert_eq!(fresh.state().unwrap(), DatatypeState::Subscribed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_realtime_clients_follow_changes() {
    let server = server();
    let writer = connected_client(&server, "writer").await;
    let follower = connected_client_with(&server, "follower", SyncType::Realtime).await;

    let counter = writer.create_counter("live").unwrap();
    writer.sync().await.unwrap();
    let mirror = follower.subscribe_counter("live").unwrap();
    follower.sync().await.unwrap();

    counter.increase(7).unwrap();
    writer.sync().await.unwrap();

    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if mirror.get().unwrap() == 7 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(converged.is_ok(), "follower never saw the change");
    follower.close().await.unwrap();
}

/// Forwards every exchange to the server but loses the first push-pull response.
struct LossyTransport {
    inner: LocalTransport,
    lost: AtomicBool,
}

#[async_trait]
impl Transport for LossyTransport {
    fn transport_type(&self) -> &'static str {
        "lossy"
    }

    async fn process_client(&self, request: ClientRequest) -> orda::Result<ClientResponse> {
        self.inner.process_client(request).await
    }

    async fn process_push_pull(&self, request: PushPullRequest) -> orda::Result<PushPullResponse> {
        let response = self.inner.process_push_pull(request).await?;
        if self.lost.swap(true, Ordering::SeqCst) {
            return Ok(response);
        }
        Err(ClientError::Sync {
            reason: "response lost".into(),
        }
        .into())
    }
}

#[tokio::test]
async fn test_lost_create_response_is_recovered() {
    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<(DatatypeState, DatatypeState)>>,
    }
    impl DatatypeHandlers for Recorder {
        fn on_state_change(&self, _key: &str, old: DatatypeState, new: DatatypeState) {
            self.states.lock().unwrap().push((old, new));
        }
    }

    let server = server();
    let client = Client::with_transport(
        ClientConfig::new(COLLECTION, "lossy"),
        Arc::new(LossyTransport {
            inner: LocalTransport::new(server.clone()),
            lost: AtomicBool::new(false),
        }),
    );
    client.connect().await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let handlers: Arc<dyn DatatypeHandlers> = recorder.clone();
    let counter = client
        .create_datatype::<CounterSnapshot>("k", Some(handlers))
        .unwrap();
    counter.increase(1).unwrap();
    assert!(client.sync().await.is_err());
    assert_eq!(counter.state().unwrap(), DatatypeState::DueToCreate);

    client.sync().await.unwrap();
    client.sync().await.unwrap();
    assert_eq!(counter.state().unwrap(), DatatypeState::Subscribed);
    assert_eq!(counter.checkpoint().unwrap(), CheckPoint::new(1, 1));
    assert_eq!(counter.get().unwrap(), 1);
    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![(DatatypeState::DueToCreate, DatatypeState::Subscribed)]
    );

    let observer = connected_client(&server, "observer").await;
    let mirror = observer.subscribe_counter("k").unwrap();
    observer.sync().await.unwrap();
    assert_eq!(mirror.get().unwrap(), 1);
}
