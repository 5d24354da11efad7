//! Counter snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::{Snapshot, unexpected_operation};
use crate::{
    Result,
    operations::{OpBody, Operation},
    types::DatatypeType,
};

/// A 32-bit counter. Increments commute, so no timestamps are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    value: i32,
}

impl CounterSnapshot {
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Add `delta`, wrapping on overflow, and return the new value.
    pub fn increase(&mut self, delta: i32) -> i32 {
        self.value = self.value.wrapping_add(delta);
        self.value
    }
}

impl Snapshot for CounterSnapshot {
    const TYPE: DatatypeType = DatatypeType::Counter;

    fn execute_remote(&mut self, op: &Operation) -> Result<()> {
        match &op.body {
            OpBody::Increase { delta } => {
                self.increase(*delta);
                Ok(())
            }
            _ => Err(unexpected_operation(Self::TYPE, op)),
        }
    }

    fn to_json(&self) -> Json {
        Json::from(self.value)
    }
}
