//! Logical clock primitives and identifiers shared by every layer.

mod checkpoint;
mod operation_id;
mod timestamp;
mod uid;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use checkpoint::CheckPoint;
pub use operation_id::OperationId;
pub use timestamp::Timestamp;
pub use uid::{Cuid, Duid, UID_LEN, Uid};

/// The kinds of replicated datatypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatatypeType {
    Counter,
    Map,
    List,
    Document,
}

impl DatatypeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatatypeType::Counter => "counter",
            DatatypeType::Map => "map",
            DatatypeType::List => "list",
            DatatypeType::Document => "document",
        }
    }
}

impl fmt::Display for DatatypeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
