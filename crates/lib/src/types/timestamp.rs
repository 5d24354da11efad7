//! Lamport timestamps used for every conflict resolution decision.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

use super::Cuid;

/// A globally unique, totally ordered logical time.
///
/// Timestamps are compared by `era`, then `lamport`, then `cuid` (lexical bytes),
/// and finally `delimiter`. The delimiter distinguishes several values minted by
/// one operation, such as the elements of a multi-value list insert.
///
/// ```
/// use orda::types::{Timestamp, Uid};
///
/// let a = Timestamp::new(0, 1, Uid::from_slice(b"A"), 0);
/// let b = Timestamp::new(0, 1, Uid::from_slice(b"B"), 0);
/// assert_eq!(a.compare(&b), -1);
/// assert_eq!(b.compare(&a), 1);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub era: u32,
    pub lamport: u64,
    pub cuid: Cuid,
    pub delimiter: u32,
}

impl Timestamp {
    pub const fn new(era: u32, lamport: u64, cuid: Cuid, delimiter: u32) -> Self {
        Self {
            era,
            lamport,
            cuid,
            delimiter,
        }
    }

    /// The zero timestamp. Anchors list heads and document roots; no operation
    /// ever carries it because issued lamports start at 1.
    pub const fn head() -> Self {
        Self::new(0, 0, Cuid::nil(), 0)
    }

    pub fn is_head(&self) -> bool {
        *self == Self::head()
    }

    /// Three-way comparison returning -1, 0 or 1.
    pub fn compare(&self, other: &Self) -> i32 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Copy of this timestamp with a different delimiter.
    pub fn with_delimiter(&self, delimiter: u32) -> Self {
        Self { delimiter, ..*self }
    }

    /// Return the current value and advance the delimiter.
    pub(crate) fn next_delimiter(&mut self) -> Self {
        let current = *self;
        self.delimiter += 1;
        current
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}:{}:{}]",
            self.era,
            self.lamport,
            self.cuid.short(),
            self.delimiter
        )
    }
}
