//! Conflict-free snapshot engines.
//!
//! Each datatype keeps its replicated state in a [`Snapshot`]. Local
//! operations are executed through type-specific methods and then annotated
//! so that [`Snapshot::execute_remote`] can replay them on any replica with
//! the same outcome.
//!
//! * [`TimedMap`] and [`TimedList`] are the generic last-writer-wins engines.
//! * [`CounterSnapshot`], [`MapSnapshot`], [`ListSnapshot`] and
//!   [`DocumentSnapshot`] are the per-type snapshots built on them.
//! * [`AnySnapshot`] lets the server handle snapshots of any type.

use std::fmt::Debug;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value as Json;

pub mod counter;
pub mod document;
pub mod list;
pub mod map;
pub mod timed_list;
pub mod timed_map;

pub use counter::CounterSnapshot;
pub use document::{DocumentSnapshot, DocumentType};
pub use list::ListSnapshot;
pub use map::MapSnapshot;
pub use timed_list::{TimedList, UpdateOutcome};
pub use timed_map::{PutOutcome, TimedMap, TimedValue};

use crate::{
    Result,
    datatypes::DatatypeError,
    operations::{OpBody, Operation},
    types::DatatypeType,
};

/// Replicated state of one datatype.
///
/// Implementations must be deterministic: applying the same operations in any
/// order that respects each replica's sequence order yields equal snapshots.
pub trait Snapshot:
    Debug + Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const TYPE: DatatypeType;

    /// Apply an operation that was executed on another replica.
    fn execute_remote(&mut self, op: &Operation) -> Result<()>;

    /// Visible value as JSON.
    fn to_json(&self) -> Json;

    /// Full state, tombstones included, as carried by snapshot operations.
    fn to_state(&self) -> Result<Json> {
        serde_json::to_value(self).map_err(|e| {
            DatatypeError::Marshal {
                reason: format!("failed to encode {} snapshot: {e}", Self::TYPE),
            }
            .into()
        })
    }

    fn from_state(state: &Json) -> Result<Self> {
        Self::deserialize(state).map_err(|e| {
            DatatypeError::Snapshot {
                reason: format!("failed to decode {} snapshot: {e}", Self::TYPE),
            }
            .into()
        })
    }
}

pub(crate) fn unexpected_operation(typ: DatatypeType, op: &Operation) -> crate::Error {
    DatatypeError::illegal_operation(format!("{} cannot apply {}", typ, op.body.name())).into()
}

/// A snapshot of any datatype type.
#[derive(Debug, Clone, PartialEq)]
pub enum AnySnapshot {
    Counter(CounterSnapshot),
    Map(MapSnapshot),
    List(ListSnapshot),
    Document(DocumentSnapshot),
}

impl AnySnapshot {
    pub fn new(typ: DatatypeType) -> Self {
        match typ {
            DatatypeType::Counter => AnySnapshot::Counter(CounterSnapshot::default()),
            DatatypeType::Map => AnySnapshot::Map(MapSnapshot::default()),
            DatatypeType::List => AnySnapshot::List(ListSnapshot::default()),
            DatatypeType::Document => AnySnapshot::Document(DocumentSnapshot::default()),
        }
    }

    pub fn from_state(typ: DatatypeType, state: &Json) -> Result<Self> {
        Ok(match typ {
            DatatypeType::Counter => AnySnapshot::Counter(CounterSnapshot::from_state(state)?),
            DatatypeType::Map => AnySnapshot::Map(MapSnapshot::from_state(state)?),
            DatatypeType::List => AnySnapshot::List(ListSnapshot::from_state(state)?),
            DatatypeType::Document => {
                AnySnapshot::Document(DocumentSnapshot::from_state(state)?)
            }
        })
    }

    pub fn datatype_type(&self) -> DatatypeType {
        match self {
            AnySnapshot::Counter(_) => DatatypeType::Counter,
            AnySnapshot::Map(_) => DatatypeType::Map,
            AnySnapshot::List(_) => DatatypeType::List,
            AnySnapshot::Document(_) => DatatypeType::Document,
        }
    }

    /// Apply a logged operation. Snapshot operations replace the state and
    /// protocol-only operations are skipped.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        match &op.body {
            OpBody::Snapshot { state } => {
                *self = AnySnapshot::from_state(self.datatype_type(), state)?;
                Ok(())
            }
            OpBody::Transaction { .. } | OpBody::Error { .. } => Ok(()),
            _ => match self {
                AnySnapshot::Counter(s) => s.execute_remote(op),
                AnySnapshot::Map(s) => s.execute_remote(op),
                AnySnapshot::List(s) => s.execute_remote(op),
                AnySnapshot::Document(s) => s.execute_remote(op),
            },
        }
    }

    pub fn to_state(&self) -> Result<Json> {
        match self {
            AnySnapshot::Counter(s) => s.to_state(),
            AnySnapshot::Map(s) => s.to_state(),
            AnySnapshot::List(s) => s.to_state(),
            AnySnapshot::Document(s) => s.to_state(),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            AnySnapshot::Counter(s) => s.to_json(),
            AnySnapshot::Map(s) => s.to_json(),
            AnySnapshot::List(s) => s.to_json(),
            AnySnapshot::Document(s) => s.to_json(),
        }
    }
}
