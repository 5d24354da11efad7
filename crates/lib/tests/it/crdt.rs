//! Convergence of the snapshot engines.
//!
//! Each test issues local operations on two replicas, then delivers every
//! operation to the other replica as a remote operation.

use orda::{
    crdt::{CounterSnapshot, DocumentSnapshot, DocumentType, ListSnapshot, MapSnapshot, Snapshot},
    operations::{OpBody, Operation},
    types::Timestamp,
};
use serde_json::json;

use crate::helpers::{remote_op, ts};

fn deliver<S: Snapshot>(replica: &mut S, ops: &[Operation]) {
    for op in ops {
        replica.execute_remote(op).expect("Failed to apply remote operation");
    }
}

#[test]
fn test_counter_increments_commute() {
    let ops = [
        remote_op("A", 1, OpBody::Increase { delta: 5 }),
        remote_op("B", 1, OpBody::Increase { delta: 3 }),
        remote_op("A", 2, OpBody::Increase { delta: -2 }),
    ];
    let mut forward = CounterSnapshot::default();
    let mut backward = CounterSnapshot::default();
    deliver(&mut forward, &ops);
    let reversed: Vec<_> = ops.iter().rev().cloned().collect();
    deliver(&mut backward, &reversed);
    assert_eq!(forward.value(), 6);
    assert_eq!(forward, backward);
}

#[test]
fn test_concurrent_map_puts_pick_greater_cuid() {
    let mut a = MapSnapshot::default();
    let mut b = MapSnapshot::default();
    a.put("k", json!(1), ts(1, "A")).unwrap();
    b.put("k", json!(2), ts(1, "B")).unwrap();

    deliver(
        &mut a,
        &[remote_op("B", 1, OpBody::Put { key: "k".into(), value: json!(2) })],
    );
    deliver(
        &mut b,
        &[remote_op("A", 1, OpBody::Put { key: "k".into(), value: json!(1) })],
    );

    // equal lamports: the greater cuid "B" wins on both replicas
    assert_eq!(a.get("k"), Some(&json!(2)));
    assert_eq!(a.to_json(), b.to_json());
}

#[test]
fn test_map_remove_racing_put() {
    let mut a = MapSnapshot::default();
    let mut b = MapSnapshot::default();
    let initial = remote_op("A", 1, OpBody::Put { key: "k".into(), value: json!("v") });
    deliver(&mut a, std::slice::from_ref(&initial));
    deliver(&mut b, &[initial]);

    a.remove("k", ts(2, "A")).unwrap();
    b.put("k", json!("w"), ts(3, "B")).unwrap();
    deliver(&mut a, &[remote_op("B", 3, OpBody::Put { key: "k".into(), value: json!("w") })]);
    deliver(&mut b, &[remote_op("A", 2, OpBody::Remove { key: "k".into() })]);

    // the later put survives the earlier remove
    assert_eq!(a.get("k"), Some(&json!("w")));
    assert_eq!(a.to_json(), b.to_json());
}

#[test]
fn test_map_state_round_trip_keeps_tombstones() {
    let mut map = MapSnapshot::default();
    map.put("gone", json!(1), ts(1, "A")).unwrap();
    map.put("kept", json!(2), ts(2, "A")).unwrap();
    map.remove("gone", ts(3, "A")).unwrap();

    let restored = MapSnapshot::from_state(&map.to_state().unwrap()).unwrap();
    assert_eq!(restored.to_json(), json!({"kept": 2}));
    assert_eq!(restored.tombstones(), vec![("gone".to_string(), ts(3, "A"))]);

    // a stale put must still lose against the restored tombstone
    let mut restored = restored;
    deliver(
        &mut restored,
        &[remote_op("B", 2, OpBody::Put { key: "gone".into(), value: json!(9) })],
    );
    assert_eq!(restored.get("gone"), None);
}

#[test]
fn test_concurrent_list_inserts_at_front_converge() {
    let mut a = ListSnapshot::default();
    let mut b = ListSnapshot::default();
    let a_target = a.insert(0, &[json!("x"), json!("y")], ts(1, "A")).unwrap();
    let b_target = b.insert(0, &[json!("a"), json!("b")], ts(1, "B")).unwrap();
    assert!(a_target.is_head() && b_target.is_head());

    deliver(
        &mut a,
        &[remote_op(
            "B",
            1,
            OpBody::Insert {
                pos: 0,
                target: Some(b_target),
                values: vec![json!("a"), json!("b")],
            },
        )],
    );
    deliver(
        &mut b,
        &[remote_op(
            "A",
            1,
            OpBody::Insert {
                pos: 0,
                target: Some(a_target),
                values: vec![json!("x"), json!("y")],
            },
        )],
    );

    assert_eq!(a.len(), 4);
    assert_eq!(a.values(), b.values());
    // each replica's run stays contiguous and in order
    let values = a.values();
    let x = values.iter().position(|v| v == "x").unwrap();
    let a_pos = values.iter().position(|v| v == "a").unwrap();
    assert_eq!(values[x + 1], json!("y"));
    assert_eq!(values[a_pos + 1], json!("b"));
}

#[test]
fn test_list_delete_and_update_race() {
    let mut a = ListSnapshot::default();
    let mut b = ListSnapshot::default();
    let seed = remote_op(
        "A",
        1,
        OpBody::Insert {
            pos: 0,
            target: Some(Timestamp::head()),
            values: vec![json!(1), json!(2), json!(3)],
        },
    );
    deliver(&mut a, std::slice::from_ref(&seed));
    deliver(&mut b, &[seed]);

    let (deleted, _) = a.delete(1, 1, ts(2, "A")).unwrap();
    let (updated, _) = b.update(1, &[json!(20)], ts(3, "B")).unwrap();
    assert_eq!(deleted, updated);

    deliver(
        &mut a,
        &[remote_op(
            "B",
            3,
            OpBody::Update {
                pos: 1,
                targets: updated.clone(),
                values: vec![json!(20)],
            },
        )],
    );
    deliver(
        &mut b,
        &[remote_op(
            "A",
            2,
            OpBody::Delete {
                pos: 1,
                num_of_nodes: 1,
                targets: deleted,
            },
        )],
    );

    assert_eq!(a.values(), vec![json!(1), json!(3)]);
    assert_eq!(a.values(), b.values());
}

#[test]
fn test_update_into_deleted_document_object() {
    let seed = remote_op(
        "A",
        1,
        OpBody::DocPut {
            parent: Timestamp::head(),
            key: "K2".into(),
            value: json!({"E1": 1}),
        },
    );
    let mut a = DocumentSnapshot::default();
    let mut b = DocumentSnapshot::default();
    deliver(&mut a, std::slice::from_ref(&seed));
    deliver(&mut b, &[seed]);
    let root = a.get_root_document();
    let k2 = a.get_from_object(&root, "K2").unwrap().unwrap();
    assert_eq!(a.get_document_type(&k2).unwrap(), DocumentType::Object);

    // A deletes K2 while B, unaware, updates K2.E1
    a.remove_in_object(root, "K2", ts(2, "A")).unwrap();
    b.put_in_object(k2, "E1", &json!(2), ts(2, "B")).unwrap();

    deliver(
        &mut a,
        &[remote_op(
            "B",
            2,
            OpBody::DocPut {
                parent: k2,
                key: "E1".into(),
                value: json!(2),
            },
        )],
    );
    deliver(
        &mut b,
        &[remote_op(
            "A",
            2,
            OpBody::DocRemove {
                parent: root,
                key: "K2".into(),
            },
        )],
    );

    for replica in [&a, &b] {
        assert_eq!(replica.to_json(), json!({}));
        assert!(replica.is_garbage(&k2));
        assert!(replica.cemetery().any(|node| *node == k2));
        // the update landed in the buried copy
        assert_eq!(replica.to_json_at(&k2).unwrap(), json!({"E1": 2}));
    }
}

#[test]
fn test_document_state_round_trip() {
    let mut doc = DocumentSnapshot::default();
    let root = doc.get_root_document();
    doc.put_in_object(root, "list", &json!([1, {"deep": true}]), ts(1, "A"))
        .unwrap();
    doc.put_in_object(root, "old", &json!({"x": 1}), ts(2, "A")).unwrap();
    doc.remove_in_object(root, "old", ts(3, "A")).unwrap();

    let restored = DocumentSnapshot::from_state(&doc.to_state().unwrap()).unwrap();
    assert_eq!(restored.to_json(), json!({"list": [1, {"deep": true}]}));
    assert_eq!(
        restored.cemetery().count(),
        doc.cemetery().count(),
        "cemetery survives the round trip"
    );
    let list = restored.get_from_object(&root, "list").unwrap().unwrap();
    let second = restored.get_from_array(&list, 1).unwrap();
    assert_eq!(restored.get_parent_document(&second).unwrap(), Some(list));
}
