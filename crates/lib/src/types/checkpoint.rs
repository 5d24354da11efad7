//! Client/server sequence watermarks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sequence watermarks for one (client, datatype) pair.
///
/// `cseq` is the highest client sequence number the server has accepted and
/// `sseq` is the highest server sequence number the client has pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckPoint {
    pub sseq: u64,
    pub cseq: u64,
}

impl CheckPoint {
    pub const fn new(sseq: u64, cseq: u64) -> Self {
        Self { sseq, cseq }
    }

    /// Raise both watermarks component-wise; never lowers either.
    pub fn raise(&mut self, other: &CheckPoint) {
        self.sseq = self.sseq.max(other.sseq);
        self.cseq = self.cseq.max(other.cseq);
    }

    pub fn set(&mut self, sseq: u64, cseq: u64) {
        self.sseq = sseq;
        self.cseq = cseq;
    }
}

impl fmt::Display for CheckPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(sseq:{}, cseq:{})", self.sseq, self.cseq)
    }
}
