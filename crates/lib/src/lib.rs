//!
//! Orda: operation-based CRDT datatypes synchronized through a checkpointed
//! push-pull protocol.
//!
//! ## Core Concepts
//!
//! * **Snapshots (`crdt`)**: Conflict-free engines for counters, maps, lists and
//!   JSON documents. Conflicts resolve by last-writer-wins on Lamport
//!   [`types::Timestamp`]s; deleted values are kept as tombstones.
//! * **Datatypes (`datatypes`)**: The façades applications use ([`Counter`],
//!   [`HashMap`], [`List`], [`Document`]). Every local operation runs in a
//!   transaction that can be rolled back, and committed operations are
//!   buffered until the server acknowledges them.
//! * **Push-pull (`pushpull`)**: The wire protocol. Checkpoints on both sides
//!   deliver every operation exactly once and in order.
//! * **Client (`client`)**: Owns datatypes and syncs them through a
//!   [`client::Transport`].
//! * **Server (`server`)**: Applies pushed operations, serves pulls and keeps
//!   snapshots through pluggable persistence, locking and notification.

pub mod client;
pub mod clock;
pub mod constants;
pub mod context;
pub mod crdt;
pub mod datatypes;
pub mod operations;
pub mod pushpull;
pub mod server;
pub mod types;

pub use client::{Client, ClientConfig, ClientError, SyncType};
pub use clock::{Clock, SystemClock};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use datatypes::{
    Counter, DatatypeError, DatatypeHandlers, DatatypeState, Document, HashMap, List,
};
pub use pushpull::PushPullError;
pub use server::{Server, ServerConfig, ServerError};

/// Result type used throughout the Orda library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Orda library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured client errors from the client module
    #[error(transparent)]
    Client(client::ClientError),

    /// Structured datatype errors from the datatypes module
    #[error(transparent)]
    Datatype(datatypes::DatatypeError),

    /// Structured protocol errors from the pushpull module
    #[error(transparent)]
    PushPull(pushpull::PushPullError),

    /// Structured server errors from the server module
    #[error(transparent)]
    Server(server::ServerError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Client(_) => "client",
            Error::Datatype(_) => "datatypes",
            Error::PushPull(_) => "pushpull",
            Error::Server(_) => "server",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Stable numeric code of this error, as carried by error operations.
    pub fn code(&self) -> u32 {
        match self {
            Error::Client(err) => err.code(),
            Error::Datatype(err) => err.code(),
            Error::PushPull(err) => err.code(),
            Error::Server(err) => err.code(),
            Error::Io(_) => ServerError::DbQuery {
                reason: String::new(),
            }
            .code(),
            Error::Serialize(_) => DatatypeError::Marshal {
                reason: String::new(),
            }
            .code(),
        }
    }

    /// The error message without the kind prefix.
    pub fn reason(&self) -> String {
        match self {
            Error::Client(err) => err.reason().to_string(),
            Error::Datatype(err) => err.reason().to_string(),
            Error::PushPull(err) => err.reason().to_string(),
            Error::Server(err) => err.reason().to_string(),
            Error::Io(err) => err.to_string(),
            Error::Serialize(err) => err.to_string(),
        }
    }

    /// Rebuild a typed error from a code and message. Unknown codes become
    /// [`PushPullError::AbortionOfServer`].
    pub fn from_code(code: u32, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if let Some(err) = ClientError::from_code(code, msg.clone()) {
            return err.into();
        }
        if let Some(err) = DatatypeError::from_code(code, msg.clone()) {
            return err.into();
        }
        if let Some(err) = PushPullError::from_code(code, msg.clone()) {
            return err.into();
        }
        if let Some(err) = ServerError::from_code(code, msg.clone()) {
            return err.into();
        }
        PushPullError::AbortionOfServer {
            reason: format!("unknown error code {code}: {msg}"),
        }
        .into()
    }

    /// Check if this error was caused by invalid arguments or targets.
    pub fn is_validation_error(&self) -> bool {
        match self {
            Error::Datatype(err) => err.is_validation_error(),
            _ => false,
        }
    }

    /// Check if the operation would not have changed anything.
    pub fn is_no_op(&self) -> bool {
        match self {
            Error::Datatype(err) => err.is_no_op(),
            _ => false,
        }
    }

    /// Check if this error indicates corrupted state or payloads.
    pub fn is_corruption(&self) -> bool {
        match self {
            Error::Datatype(err) => err.is_corruption(),
            Error::Server(ServerError::DbDecode { .. }) => true,
            _ => false,
        }
    }

    pub fn is_transaction_error(&self) -> bool {
        match self {
            Error::Datatype(err) => err.is_transaction_error(),
            _ => false,
        }
    }

    pub fn is_subscribe_error(&self) -> bool {
        match self {
            Error::Datatype(err) => err.is_subscribe_error(),
            _ => false,
        }
    }

    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Error::PushPull(err) => err.is_duplicate_key(),
            _ => false,
        }
    }

    pub fn is_missing_ops(&self) -> bool {
        match self {
            Error::PushPull(err) => err.is_missing_ops(),
            _ => false,
        }
    }

    pub fn is_no_datatype_to_subscribe(&self) -> bool {
        match self {
            Error::PushPull(err) => err.is_no_datatype_to_subscribe(),
            _ => false,
        }
    }

    pub fn is_abortion_of_server(&self) -> bool {
        match self {
            Error::PushPull(err) => err.is_abortion_of_server(),
            _ => false,
        }
    }

    /// Check if the failed request can be retried as is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::PushPull(err) => err.is_retryable(),
            Error::Client(err) => err.is_sync_error(),
            _ => false,
        }
    }

    /// Check if this error is client-related.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Client(_))
    }

    /// Check if this error is server-related.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Check if this error is database/persistence-related.
    pub fn is_database_error(&self) -> bool {
        match self {
            Error::Server(err) => err.is_database_error(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Server(err) => err.is_not_found(),
            _ => false,
        }
    }
}
