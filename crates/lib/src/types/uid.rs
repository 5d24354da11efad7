//! Unique identifiers for client replicas and datatype instances.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::datatypes::DatatypeError;

/// Length in bytes of every [`Uid`].
pub const UID_LEN: usize = 16;

/// A 16-byte identifier ordered lexically by its bytes.
///
/// Clients are identified by a CUID and datatype instances by a DUID; both are
/// plain `Uid`s. On the wire a `Uid` is a 32 character lowercase hex string.
///
/// ```
/// use orda::types::Uid;
///
/// let a = Uid::from_slice(b"A");
/// let b = Uid::from_slice(b"B");
/// assert!(a < b);
/// assert_eq!(a.to_string().len(), 32);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uid([u8; UID_LEN]);

/// Identifier of a client replica.
pub type Cuid = Uid;

/// Identifier of a datatype instance.
pub type Duid = Uid;

impl Uid {
    /// Generate a new random identifier.
    pub fn new() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// The all-zero identifier, used by server-minted operations.
    pub const fn nil() -> Self {
        Self([0; UID_LEN])
    }

    /// Build an identifier from raw bytes.
    pub const fn from_bytes(bytes: [u8; UID_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an identifier from a byte slice, zero-padding or truncating to 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = [0; UID_LEN];
        let len = bytes.len().min(UID_LEN);
        buf[..len].copy_from_slice(&bytes[..len]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; UID_LEN] {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == [0; UID_LEN]
    }

    /// Short form used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({self})")
    }
}

impl FromStr for Uid {
    type Err = DatatypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| DatatypeError::Marshal {
            reason: format!("invalid uid '{s}': {e}"),
        })?;
        let bytes: [u8; UID_LEN] = bytes.try_into().map_err(|_| DatatypeError::Marshal {
            reason: format!("invalid uid length for '{s}'"),
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
