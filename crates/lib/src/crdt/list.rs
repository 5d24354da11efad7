//! List snapshot: an ordered sequence of JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{Snapshot, TimedList, UpdateOutcome, unexpected_operation};
use crate::{
    Result,
    datatypes::DatatypeError,
    operations::{OpBody, Operation},
    types::{DatatypeType, Timestamp},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListSnapshot {
    list: TimedList<Json>,
}

/// Stamp each value with the operation timestamp and a running delimiter.
fn stamp(ts: Timestamp, values: &[Json]) -> Vec<(Timestamp, Json)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (ts.with_delimiter(i as u32), v.clone()))
        .collect()
}

impl ListSnapshot {
    /// Local insert at `pos`. Returns the anchor the values were inserted after.
    pub fn insert(&mut self, pos: usize, values: &[Json], ts: Timestamp) -> Result<Timestamp> {
        if values.is_empty() {
            return Err(DatatypeError::illegal_parameters("nothing to insert").into());
        }
        let target = self.list.anchor_for_insert(pos)?;
        self.list.insert_after(target, stamp(ts, values))?;
        Ok(target)
    }

    /// Local delete. Returns the deleted targets and values.
    pub fn delete(
        &mut self,
        pos: usize,
        num_of_nodes: usize,
        ts: Timestamp,
    ) -> Result<(Vec<Timestamp>, Vec<Json>)> {
        Ok(self.list.delete_at(pos, num_of_nodes, ts)?.into_iter().unzip())
    }

    /// Local update. Returns the targets and the values they held before.
    pub fn update(
        &mut self,
        pos: usize,
        values: &[Json],
        ts: Timestamp,
    ) -> Result<(Vec<Timestamp>, Vec<Json>)> {
        let mut targets = Vec::with_capacity(values.len());
        let mut previous = Vec::with_capacity(values.len());
        for (target, outcome) in self.list.update_at(pos, stamp(ts, values))? {
            targets.push(target);
            match outcome {
                UpdateOutcome::Applied(old) => previous.push(old),
                UpdateOutcome::Rejected(_) => {
                    return Err(DatatypeError::corruption(format!(
                        "local update lost against {target}"
                    ))
                    .into());
                }
            }
        }
        Ok((targets, previous))
    }

    pub fn get(&self, pos: usize) -> Result<Json> {
        self.list.get(pos).cloned().ok_or_else(|| {
            DatatypeError::illegal_parameters(format!(
                "position {pos} out of bounds for list of {}",
                self.list.len()
            ))
            .into()
        })
    }

    pub fn get_many(&self, pos: usize, count: usize) -> Result<Vec<Json>> {
        Ok(self.list.get_many(pos, count)?)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn values(&self) -> Vec<Json> {
        self.list.to_vec()
    }
}

impl Snapshot for ListSnapshot {
    const TYPE: DatatypeType = DatatypeType::List;

    fn execute_remote(&mut self, op: &Operation) -> Result<()> {
        let ts = op.timestamp();
        match &op.body {
            OpBody::Insert { target, values, .. } => {
                let target = target.ok_or_else(|| DatatypeError::NoTarget {
                    reason: "insert without target".into(),
                })?;
                self.list.insert_after(target, stamp(ts, values))?;
            }
            OpBody::Delete { targets, .. } => {
                self.list.delete_targets(targets, ts)?;
            }
            OpBody::Update { targets, values, .. } => {
                self.list.update_targets(targets, stamp(ts, values))?;
            }
            _ => return Err(unexpected_operation(Self::TYPE, op)),
        }
        Ok(())
    }

    fn to_json(&self) -> Json {
        Json::Array(self.list.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{OperationId, Uid};

    /// Execute locally and return the annotated operation.
    fn local_insert(
        list: &mut ListSnapshot,
        id: &mut OperationId,
        pos: usize,
        values: Vec<Json>,
    ) -> Operation {
        let op_id = id.next();
        let target = list.insert(pos, &values, op_id.timestamp()).unwrap();
        Operation::new(
            op_id,
            OpBody::Insert {
                pos,
                target: Some(target),
                values,
            },
        )
    }

    #[test]
    fn test_concurrent_front_inserts_converge() {
        let mut a = ListSnapshot::default();
        let mut b = ListSnapshot::default();
        let mut a_id = OperationId::new(Uid::from_slice(b"A"));
        let mut b_id = OperationId::new(Uid::from_slice(b"B"));

        let from_a = local_insert(&mut a, &mut a_id, 0, vec![json!("x"), json!("y")]);
        let from_b = local_insert(&mut b, &mut b_id, 0, vec![json!("a"), json!("b")]);

        a.execute_remote(&from_b).unwrap();
        b.execute_remote(&from_a).unwrap();

        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn test_local_ops_validate_positions() {
        let mut list = ListSnapshot::default();
        let ts = |l| Timestamp::new(0, l, Uid::from_slice(b"A"), 0);
        assert!(list.insert(1, &[json!(1)], ts(1)).is_err());
        assert!(list.insert(0, &[], ts(1)).is_err());
        list.insert(0, &[json!(1), json!(2), json!(3)], ts(1)).unwrap();

        let (targets, removed) = list.delete(1, 1, ts(2)).unwrap();
        assert_eq!(targets, vec![ts(1).with_delimiter(1)]);
        assert_eq!(removed, vec![json!(2)]);

        let (_, previous) = list.update(1, &[json!("three")], ts(3)).unwrap();
        assert_eq!(previous, vec![json!(3)]);
        assert_eq!(list.to_json(), json!([1, "three"]));
        assert!(list.update(1, &[json!(0), json!(0)], ts(4)).is_err());
        assert!(list.get(2).is_err());
    }

    #[test]
    fn test_remote_delete_and_update_commute() {
        let mut origin = ListSnapshot::default();
        let mut id = OperationId::new(Uid::from_slice(b"A"));
        let insert = local_insert(&mut origin, &mut id, 0, vec![json!("v")]);
        let target = insert.id.timestamp();

        let delete = Operation::new(
            OperationId { lamport: 2, ..insert.id },
            OpBody::Delete {
                pos: 0,
                num_of_nodes: 1,
                targets: vec![target],
            },
        );
        let mut other = OperationId::new(Uid::from_slice(b"B"));
        other.sync_lamport(2);
        let update = Operation::new(
            other.next(),
            OpBody::Update {
                pos: 0,
                targets: vec![target],
                values: vec![json!("u")],
            },
        );

        let mut left = ListSnapshot::default();
        left.execute_remote(&insert).unwrap();
        left.execute_remote(&delete).unwrap();
        left.execute_remote(&update).unwrap();

        let mut right = ListSnapshot::default();
        right.execute_remote(&insert).unwrap();
        right.execute_remote(&update).unwrap();
        right.execute_remote(&delete).unwrap();

        assert_eq!(left, right);
        assert!(left.is_empty());
    }
}
