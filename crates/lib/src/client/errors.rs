//! Error types for client sessions.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Registering with the server failed
    #[error("failed to connect: {reason}")]
    Connect { reason: String },

    /// The client could not be closed cleanly
    #[error("failed to close: {reason}")]
    Close { reason: String },

    /// A push-pull exchange failed at the transport level
    #[error("failed to sync: {reason}")]
    Sync { reason: String },
}

impl ClientError {
    pub fn code(&self) -> u32 {
        match self {
            ClientError::Connect { .. } => 101,
            ClientError::Close { .. } => 102,
            ClientError::Sync { .. } => 103,
        }
    }

    pub fn from_code(code: u32, reason: impl Into<String>) -> Option<Self> {
        let reason = reason.into();
        match code {
            101 => Some(ClientError::Connect { reason }),
            102 => Some(ClientError::Close { reason }),
            103 => Some(ClientError::Sync { reason }),
            _ => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ClientError::Connect { reason }
            | ClientError::Close { reason }
            | ClientError::Sync { reason } => reason,
        }
    }

    pub fn is_connect_error(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }

    pub fn is_sync_error(&self) -> bool {
        matches!(self, ClientError::Sync { .. })
    }
}

impl From<ClientError> for crate::Error {
    fn from(err: ClientError) -> Self {
        crate::Error::Client(err)
    }
}
