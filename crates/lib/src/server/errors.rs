//! Error types for the push-pull server and its collaborators.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// A persistence query failed
    #[error("database query failed: {reason}")]
    DbQuery { reason: String },

    /// A persisted record could not be decoded
    #[error("failed to decode record: {reason}")]
    DbDecode { reason: String },

    /// The addressed collection or record does not exist
    #[error("no such resource: {reason}")]
    NoResource { reason: String },

    #[error("permission denied: {reason}")]
    NoPermission { reason: String },

    /// The server could not be initialized
    #[error("initialization failed: {reason}")]
    Init { reason: String },

    /// Publishing a notification failed
    #[error("notification failed: {reason}")]
    Notify { reason: String },
}

impl ServerError {
    pub(crate) fn db_query(reason: impl Into<String>) -> Self {
        ServerError::DbQuery {
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ServerError::DbQuery { .. } => 501,
            ServerError::DbDecode { .. } => 502,
            ServerError::NoResource { .. } => 503,
            ServerError::NoPermission { .. } => 504,
            ServerError::Init { .. } => 505,
            ServerError::Notify { .. } => 506,
        }
    }

    pub fn from_code(code: u32, reason: impl Into<String>) -> Option<Self> {
        let reason = reason.into();
        let err = match code {
            501 => ServerError::DbQuery { reason },
            502 => ServerError::DbDecode { reason },
            503 => ServerError::NoResource { reason },
            504 => ServerError::NoPermission { reason },
            505 => ServerError::Init { reason },
            506 => ServerError::Notify { reason },
            _ => return None,
        };
        Some(err)
    }

    pub fn reason(&self) -> &str {
        match self {
            ServerError::DbQuery { reason }
            | ServerError::DbDecode { reason }
            | ServerError::NoResource { reason }
            | ServerError::NoPermission { reason }
            | ServerError::Init { reason }
            | ServerError::Notify { reason } => reason,
        }
    }

    /// Check if this error came from the persistence layer
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            ServerError::DbQuery { .. } | ServerError::DbDecode { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NoResource { .. })
    }
}

impl From<ServerError> for crate::Error {
    fn from(err: ServerError) -> Self {
        crate::Error::Server(err)
    }
}
