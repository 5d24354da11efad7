//! Push-pull wire protocol.
//!
//! A client sends one [`PushPullPack`] per datatype inside a
//! [`PushPullRequest`]. Each pack carries the operations the server has not
//! acknowledged yet plus the client's [`CheckPoint`]; the server answers with
//! a pack holding the operations the client has not pulled yet and the new
//! checkpoint.

mod errors;

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use errors::PushPullError;

use crate::{
    operations::{OpBody, Operation},
    types::{CheckPoint, Cuid, DatatypeType, Duid, OperationId},
};

/// Version of the push-pull wire protocol.
pub const PROTOCOL_VERSION: &str = "v1";

bitflags! {
    /// Independent option bits of a push-pull pack.
    #[derive(Copy, Debug, Default, Clone, Eq, PartialEq, Hash)]
    pub struct PushPullOptions: u32 {
        const CREATE      = 0x01;
        const SUBSCRIBE   = 0x02;
        const UNSUBSCRIBE = 0x04;
        const DELETE      = 0x08;
        const SNAPSHOT    = 0x10;
        const ERROR       = 0x20;
    }
}

impl Serialize for PushPullOptions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for PushPullOptions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        PushPullOptions::from_bits(bits)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown push-pull option bits {bits:#x}")))
    }
}

/// Unit of operation exchange for one datatype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPullPack {
    pub key: String,
    pub duid: Duid,
    pub option: PushPullOptions,
    pub checkpoint: CheckPoint,
    pub era: u32,
    #[serde(rename = "type")]
    pub datatype_type: DatatypeType,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl PushPullPack {
    /// Response pack reporting `err` for the request pack `request`.
    pub fn error_response(request: &PushPullPack, err: &crate::Error) -> Self {
        PushPullPack {
            key: request.key.clone(),
            duid: request.duid,
            option: PushPullOptions::ERROR,
            checkpoint: request.checkpoint,
            era: request.era,
            datatype_type: request.datatype_type,
            operations: vec![Operation::new(
                OperationId::new(Cuid::nil()),
                OpBody::Error {
                    code: err.code(),
                    msg: err.reason(),
                },
            )],
        }
    }

    /// The error carried by an error pack.
    pub fn error(&self) -> Option<crate::Error> {
        if !self.option.contains(PushPullOptions::ERROR) {
            return None;
        }
        Some(
            self.operations
                .iter()
                .find_map(Operation::to_error)
                .unwrap_or_else(|| {
                    PushPullError::AbortionOfServer {
                        reason: "error pack without error operation".into(),
                    }
                    .into()
                }),
        )
    }
}

impl fmt::Display for PushPullPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}) option:{:#04x} cp:{} ops:{}",
            self.key,
            self.datatype_type,
            self.option.bits(),
            self.checkpoint,
            self.operations.len()
        )
    }
}

/// Common header of every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub version: String,
    pub cuid: Cuid,
    pub alias: String,
    pub collection: String,
}

impl Header {
    pub fn new(cuid: Cuid, alias: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            cuid,
            alias: alias.into(),
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPullRequest {
    pub header: Header,
    pub packs: Vec<PushPullPack>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPullResponse {
    pub header: Header,
    pub packs: Vec<PushPullPack>,
}

/// Client registration request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub header: Header,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub header: Header,
    pub collection_num: u32,
}

/// Change notification published after a successful push-pull commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The client whose push produced the change
    pub cuid: Cuid,
    pub duid: Duid,
    pub key: String,
    /// Server sequence after the change
    pub sseq: u64,
}

/// Notification topic of a datatype.
pub fn topic(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}
