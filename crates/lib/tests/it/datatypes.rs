//! Transactions through the datatype façades.

use orda::{
    DatatypeError, DatatypeState,
    crdt::DocumentType,
    types::CheckPoint,
};
use serde_json::json;

use crate::helpers::{connected_client, server};

fn failure() -> orda::Error {
    DatatypeError::IllegalOperation {
        reason: "abort".into(),
    }
    .into()
}

#[tokio::test]
async fn test_failed_transaction_restores_state_and_ids() {
    let server = server();
    let client = connected_client(&server, "tx").await;
    let counter = client.create_counter("c").unwrap();
    counter.increase(1).unwrap();

    let err = counter
        .transaction("doomed", |tx| {
            tx.increase(10)?;
            tx.increase(100)?;
            assert_eq!(tx.get(), 111);
            Err::<(), _>(failure())
        })
        .unwrap_err();
    assert!(err.is_validation_error());
    assert_eq!(counter.get().unwrap(), 1);

    counter.increase(2).unwrap();
    client.sync().await.unwrap();
    // the rolled back operations never consumed sequence numbers
    assert_eq!(counter.checkpoint().unwrap(), CheckPoint::new(2, 2));
    assert_eq!(counter.get().unwrap(), 3);
}

#[tokio::test]
async fn test_committed_transaction_syncs_as_one_batch() {
    let server = server();
    let alice = connected_client(&server, "alice").await;
    let bob = connected_client(&server, "bob").await;

    let map = alice.create_map("m").unwrap();
    let written = map
        .transaction("bulk", |tx| {
            tx.put("a", 1)?;
            tx.put("b", "two")?;
            tx.remove("a")?;
            Ok(tx.keys())
        })
        .unwrap();
    assert_eq!(written, vec!["b".to_string()]);
    alice.sync().await.unwrap();

    let mirror = bob.subscribe_map("m").unwrap();
    bob.sync().await.unwrap();
    assert_eq!(mirror.to_json().unwrap(), json!({"b": "two"}));
    assert_eq!(mirror.state().unwrap(), DatatypeState::Subscribed);
}

#[tokio::test]
async fn test_nested_calls_join_the_transaction() {
    let server = server();
    let alice = connected_client(&server, "alice").await;
    let bob = connected_client(&server, "bob").await;
    let counter = alice.create_counter("c").unwrap();
    let inner = counter.clone();

    counter
        .transaction("outer", |tx| {
            tx.increase(1)?;
            inner.increase(2)?;
            inner.transaction("nested", |nested| nested.increase(3))
        })
        .unwrap();
    alice.sync().await.unwrap();
    // the marker and three increases are acknowledged as one batch
    assert_eq!(counter.checkpoint().unwrap(), CheckPoint::new(4, 4));

    let mirror = bob.subscribe_counter("c").unwrap();
    bob.sync().await.unwrap();
    assert_eq!(mirror.get().unwrap(), 6);
}

#[tokio::test]
async fn test_unwound_transaction_does_not_block_sync() {
    let server = server();
    let client = connected_client(&server, "unwind").await;
    let counter = client.create_counter("c").unwrap();

    let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        counter.transaction("boom", |tx| {
            tx.increase(5)?;
            if tx.get() == 5 {
                panic!("closure failed");
            }
            Ok(())
        })
    }));
    assert!(unwound.is_err());

    counter.increase(1).unwrap();
    counter.transaction("after", |tx| tx.increase(1)).unwrap();
    client.sync().await.unwrap();
    assert_eq!(counter.get().unwrap(), 2);
    assert_eq!(counter.checkpoint().unwrap(), CheckPoint::new(3, 3));
    assert_eq!(counter.state().unwrap(), DatatypeState::Subscribed);
}

#[tokio::test]
async fn test_list_edits_and_bounds() {
    let server = server();
    let client = connected_client(&server, "list").await;
    let list = client.create_list("l").unwrap();

    list.insert(0, vec![json!("a"), json!("c")]).unwrap();
    list.insert(1, vec![json!("b")]).unwrap();
    assert_eq!(list.values().unwrap(), vec![json!("a"), json!("b"), json!("c")]);

    assert_eq!(list.update(2, vec![json!("C")]).unwrap(), vec![json!("c")]);
    assert_eq!(list.delete(0, 1).unwrap(), vec![json!("a")]);
    assert_eq!(list.get_many(0, 2).unwrap(), vec![json!("b"), json!("C")]);

    assert!(list.get(5).unwrap_err().is_validation_error());
    assert!(list.delete(1, 5).unwrap_err().is_validation_error());
    assert_eq!(list.size().unwrap(), 2);
}

#[tokio::test]
async fn test_document_cursors() {
    let server = server();
    let client = connected_client(&server, "doc").await;
    let doc = client.create_document("d").unwrap();

    doc.put_to_object("profile", json!({"name": "ada", "tags": ["x"]}))
        .unwrap();
    let profile = doc.get_from_object("profile").unwrap().unwrap();
    assert_eq!(profile.get_document_type().unwrap(), DocumentType::Object);

    let tags = profile.get_from_object("tags").unwrap().unwrap();
    tags.insert_to_array(1, vec![json!("y"), json!("z")]).unwrap();
    tags.delete_in_array(0, 1).unwrap();
    assert_eq!(tags.to_json().unwrap(), json!(["y", "z"]));

    let parent = tags.get_parent_document().unwrap().unwrap();
    assert_eq!(parent.node(), profile.node());

    // a removed subtree is garbage; edits land there but stay invisible
    doc.remove_in_object("profile").unwrap();
    assert!(tags.is_garbage().unwrap());
    tags.insert_to_array(0, vec![json!(1)]).unwrap();
    assert_eq!(tags.to_json().unwrap(), json!([1, "y", "z"]));
    assert_eq!(doc.to_json().unwrap(), json!({}));
}

#[tokio::test]
async fn test_document_transaction_spans_nodes() {
    let server = server();
    let client = connected_client(&server, "doctx").await;
    let doc = client.create_document("d").unwrap();
    let root = doc.node();

    doc.transaction("setup", |tx| {
        tx.put_to_object(root, "list", json!([]))?;
        let list = tx
            .get_from_object(&root, "list")?
            .expect("list was just put");
        tx.insert_to_array(list, 0, vec![json!(1), json!(2)])?;
        Ok(())
    })
    .unwrap();
    assert_eq!(doc.to_json().unwrap(), json!({"list": [1, 2]}));

    let failed = doc.transaction("half", |tx| {
        tx.put_to_object(root, "extra", json!(true))?;
        tx.remove_in_object(root, "missing")
    });
    assert!(failed.is_err());
    assert_eq!(doc.to_json().unwrap(), json!({"list": [1, 2]}));
}
