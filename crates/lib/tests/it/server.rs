//! Push-pull handling as seen on the wire.

use std::{sync::Arc, time::Duration};

use orda::{
    Server, ServerConfig,
    crdt::AnySnapshot,
    operations::{OpBody, Operation},
    pushpull::{ClientRequest, Header, PushPullOptions, PushPullPack, PushPullRequest},
    server::{InMemoryPersistence, Locker, Persistence},
    types::{CheckPoint, DatatypeType, OperationId, Uid},
};
use serde_json::json;

use crate::helpers::{COLLECTION, connected_client, cuid, server, server_with_locker};

async fn register(server: &Server, name: &str) -> Header {
    let header = Header::new(cuid(name), name, COLLECTION);
    server
        .process_client(ClientRequest {
            header: header.clone(),
        })
        .await
        .expect("Failed to register client");
    header
}

fn increases(name: &str, count: usize) -> Vec<Operation> {
    let mut id = OperationId::new(cuid(name));
    (0..count)
        .map(|_| Operation::new(id.next(), OpBody::Increase { delta: 1 }))
        .collect()
}

fn counter_pack(
    duid: Uid,
    option: PushPullOptions,
    checkpoint: CheckPoint,
    operations: Vec<Operation>,
) -> PushPullPack {
    PushPullPack {
        key: "counter".into(),
        duid,
        option,
        checkpoint,
        era: 0,
        datatype_type: DatatypeType::Counter,
        operations,
    }
}

async fn exchange(server: &Server, header: &Header, packs: Vec<PushPullPack>) -> Vec<PushPullPack> {
    server
        .process_push_pull(PushPullRequest {
            header: header.clone(),
            packs,
        })
        .await
        .expect("Failed to process push-pull")
        .packs
}

#[tokio::test]
async fn test_gap_in_pushed_operations_writes_nothing() {
    let server = server();
    let header = register(&server, "A").await;
    let duid = Uid::new();
    let ops = increases("A", 4);

    let created = exchange(
        &server,
        &header,
        vec![counter_pack(
            duid,
            PushPullOptions::CREATE,
            CheckPoint::default(),
            ops[..2].to_vec(),
        )],
    )
    .await;
    assert_eq!(created[0].checkpoint, CheckPoint::new(2, 2));

    // seq 4 arrives while the server acknowledged only seq 2
    let response = exchange(
        &server,
        &header,
        vec![counter_pack(
            duid,
            PushPullOptions::empty(),
            CheckPoint::new(2, 2),
            ops[3..].to_vec(),
        )],
    )
    .await;
    let err = response[0].error().expect("gap must be rejected");
    assert!(err.is_missing_ops());

    let persistence = server.persistence();
    assert_eq!(persistence.get_operations(&duid, 1, 10).await.unwrap().len(), 2);
    let record = persistence.get_datatype(&duid).await.unwrap().unwrap();
    assert_eq!(record.sseq_end, 2);
    assert_eq!(
        persistence.get_checkpoint(&header.cuid, &duid).await.unwrap(),
        Some(CheckPoint::new(2, 2))
    );
}

#[tokio::test]
async fn test_lost_acknowledgement_is_deduplicated() {
    let server = server();
    let a = register(&server, "A").await;
    let b = register(&server, "B").await;
    let duid = Uid::new();
    exchange(
        &server,
        &a,
        vec![counter_pack(duid, PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;
    exchange(
        &server,
        &b,
        vec![counter_pack(Uid::new(), PushPullOptions::SUBSCRIBE, CheckPoint::default(), vec![])],
    )
    .await;

    let ops = increases("A", 3);
    let first = exchange(
        &server,
        &a,
        vec![counter_pack(duid, PushPullOptions::empty(), CheckPoint::default(), ops.clone())],
    )
    .await;
    assert_eq!(first[0].checkpoint, CheckPoint::new(3, 3));

    // the response was lost; A resends the same operations from the old checkpoint
    let again = exchange(
        &server,
        &a,
        vec![counter_pack(duid, PushPullOptions::empty(), CheckPoint::default(), ops)],
    )
    .await;
    assert_eq!(again[0].checkpoint, CheckPoint::new(3, 3));
    assert!(again[0].operations.is_empty(), "own operations are never pulled");

    let pulled = exchange(
        &server,
        &b,
        vec![counter_pack(duid, PushPullOptions::empty(), CheckPoint::default(), vec![])],
    )
    .await;
    assert_eq!(pulled[0].operations.len(), 3);
    assert_eq!(pulled[0].checkpoint, CheckPoint::new(3, 0));
}

#[tokio::test]
async fn test_reconnect_keeps_checkpoints() {
    let server = server();
    let a = register(&server, "A").await;
    let duid = Uid::new();
    let ops = increases("A", 2);
    exchange(
        &server,
        &a,
        vec![counter_pack(duid, PushPullOptions::CREATE, CheckPoint::default(), ops.clone())],
    )
    .await;

    // same client reconnects under a new alias
    let renamed = Header::new(cuid("A"), "A2", COLLECTION);
    server
        .process_client(ClientRequest {
            header: renamed.clone(),
        })
        .await
        .unwrap();

    let again = exchange(
        &server,
        &renamed,
        vec![counter_pack(duid, PushPullOptions::empty(), CheckPoint::default(), ops)],
    )
    .await;
    assert_eq!(again[0].checkpoint, CheckPoint::new(2, 2));
    assert!(again[0].operations.is_empty());
}

#[tokio::test]
async fn test_packs_of_one_request_are_independent() {
    let server = server();
    let a = register(&server, "A").await;
    let taken = Uid::new();
    exchange(
        &server,
        &a,
        vec![counter_pack(taken, PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;

    let b = register(&server, "B").await;
    let mut other = counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![]);
    other.key = "other".into();
    let responses = exchange(
        &server,
        &b,
        vec![
            counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![]),
            other,
        ],
    )
    .await;

    assert_eq!(responses.len(), 2);
    assert!(responses[0].error().unwrap().is_duplicate_key());
    assert_eq!(responses[1].key, "other");
    assert_eq!(responses[1].option, PushPullOptions::CREATE);
}

#[tokio::test]
async fn test_resent_create_is_treated_as_push() {
    let server = server();
    let a = register(&server, "A").await;
    let duid = Uid::new();
    let ops = increases("A", 2);
    let pack = counter_pack(duid, PushPullOptions::CREATE, CheckPoint::default(), ops);

    exchange(&server, &a, vec![pack.clone()]).await;
    let resent = exchange(&server, &a, vec![pack]).await;
    assert!(resent[0].error().is_none());
    assert_eq!(resent[0].checkpoint, CheckPoint::new(2, 2));
    assert_eq!(resent[0].option, PushPullOptions::CREATE);
    assert!(resent[0].operations.is_empty());
}

#[tokio::test]
async fn test_subscribe_to_missing_or_mistyped_datatype() {
    let server = server();
    let a = register(&server, "A").await;
    let missing = exchange(
        &server,
        &a,
        vec![counter_pack(Uid::new(), PushPullOptions::SUBSCRIBE, CheckPoint::default(), vec![])],
    )
    .await;
    assert!(missing[0].error().unwrap().is_no_datatype_to_subscribe());

    exchange(
        &server,
        &a,
        vec![counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;
    let mut as_map = counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![]);
    as_map.datatype_type = DatatypeType::Map;
    let mistyped = exchange(&server, &a, vec![as_map]).await;
    assert!(mistyped[0].error().unwrap().is_duplicate_key());
}

#[tokio::test]
async fn test_lock_timeout_aborts_pack() {
    let (server, locker) = server_with_locker(Duration::from_millis(50));
    let a = register(&server, "A").await;
    let name = orda::pushpull::topic(COLLECTION, "counter");
    let token = locker.try_lock(&name).await.unwrap();

    let response = exchange(
        &server,
        &a,
        vec![counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;
    let err = response[0].error().unwrap();
    assert!(err.is_abortion_of_server());
    assert!(err.is_retryable());

    locker.unlock(&name, token).await;
    let retried = exchange(
        &server,
        &a,
        vec![counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;
    assert!(retried[0].error().is_none());
}

#[tokio::test]
async fn test_subscribers_get_compacted_state() {
    let persistence = Arc::new(InMemoryPersistence::new());
    let server = Server::with_persistence(
        ServerConfig {
            snapshot_interval: 4,
            ..Default::default()
        },
        persistence.clone(),
    );
    let writer = connected_client(&server, "writer").await;
    let counter = writer.create_counter("counter").unwrap();
    for _ in 0..10 {
        counter.increase(1).unwrap();
    }
    writer.sync().await.unwrap();
    let duid = counter.duid().unwrap();

    // compaction runs in the background after the commit
    let mut stored = None;
    for _ in 0..100 {
        stored = persistence.get_latest_snapshot(&duid).await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let stored = stored.expect("snapshot was never stored");
    assert_eq!(stored.sseq, 10);
    let snapshot = AnySnapshot::from_state(DatatypeType::Counter, &stored.state).unwrap();
    assert_eq!(snapshot.to_json(), json!(10));

    counter.increase(5).unwrap();
    writer.sync().await.unwrap();
    let reader = connected_client(&server, "reader").await;
    let mirror = reader.subscribe_counter("counter").unwrap();
    reader.sync().await.unwrap();
    assert_eq!(mirror.get().unwrap(), 15);
}

#[tokio::test]
async fn test_unknown_client_gets_no_resource() {
    let server = server();
    let stranger = Header::new(Uid::new(), "stranger", COLLECTION);
    let response = exchange(
        &server,
        &stranger,
        vec![counter_pack(Uid::new(), PushPullOptions::CREATE, CheckPoint::default(), vec![])],
    )
    .await;
    assert!(response[0].error().unwrap().is_not_found());
}
