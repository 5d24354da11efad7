//! Per-client context carried through every datatype.

use crate::types::Cuid;

/// Identity of the client that owns a set of datatypes.
///
/// Passed explicitly to each datatype instead of living in global state, and
/// attached to log records as structured fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub cuid: Cuid,
    pub alias: String,
    pub collection: String,
}

impl ClientContext {
    pub fn new(cuid: Cuid, alias: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            cuid,
            alias: alias.into(),
            collection: collection.into(),
        }
    }
}
