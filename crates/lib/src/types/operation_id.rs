//! Operation identifiers: a Lamport clock riding on the local sequence.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Cuid, Timestamp};

/// Identifies one operation instance issued by one replica.
///
/// `seq` is the replica-local sequence number used by push-pull dedup, while
/// `lamport` is the logical clock used for conflict resolution. Both advance
/// together on [`OperationId::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub era: u32,
    pub lamport: u64,
    pub cuid: Cuid,
    pub seq: u64,
}

impl OperationId {
    pub const fn new(cuid: Cuid) -> Self {
        Self {
            era: 0,
            lamport: 0,
            cuid,
            seq: 0,
        }
    }

    /// Advance lamport and seq, returning the newly issued id.
    pub fn next(&mut self) -> OperationId {
        self.lamport += 1;
        self.seq += 1;
        *self
    }

    /// Undo the last [`OperationId::next`] after a failed local issuance.
    pub fn rollback(&mut self) {
        self.lamport = self.lamport.saturating_sub(1);
        self.seq = self.seq.saturating_sub(1);
    }

    /// Raise the local lamport to at least `remote`. The next issued id then
    /// exceeds every lamport observed so far.
    pub fn sync_lamport(&mut self, remote: u64) -> u64 {
        self.lamport = self.lamport.max(remote);
        self.lamport
    }

    /// The timestamp that orders the effects of this operation.
    pub fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.era, self.lamport, self.cuid, 0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}:{}:{}]",
            self.era,
            self.lamport,
            self.cuid.short(),
            self.seq
        )
    }
}
