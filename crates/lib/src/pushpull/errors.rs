//! Error types for the push-pull protocol.

use thiserror::Error;

/// Failures raised while a push-pull pack is processed.
///
/// These are produced by the server and travel back to the client inside an
/// error operation of the response pack.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushPullError {
    /// The server gave up on the pack, usually because the datatype lock
    /// could not be acquired. Safe to retry.
    #[error("aborted by server: {reason}")]
    AbortionOfServer { reason: String },

    /// The client gave up on the pack
    #[error("aborted by client: {reason}")]
    AbortionOfClient { reason: String },

    /// A create collided with an existing key or DUID
    #[error("duplicate datatype key: {reason}")]
    DuplicateKey { reason: String },

    /// Pushed operations skip a sequence number
    #[error("missing operations: {reason}")]
    MissingOps { reason: String },

    /// Subscribe targeted a datatype that does not exist
    #[error("no datatype to subscribe: {reason}")]
    NoDatatypeToSubscribe { reason: String },
}

impl PushPullError {
    pub fn code(&self) -> u32 {
        match self {
            PushPullError::AbortionOfServer { .. } => 401,
            PushPullError::AbortionOfClient { .. } => 402,
            PushPullError::DuplicateKey { .. } => 403,
            PushPullError::MissingOps { .. } => 404,
            PushPullError::NoDatatypeToSubscribe { .. } => 405,
        }
    }

    pub fn from_code(code: u32, reason: impl Into<String>) -> Option<Self> {
        let reason = reason.into();
        let err = match code {
            401 => PushPullError::AbortionOfServer { reason },
            402 => PushPullError::AbortionOfClient { reason },
            403 => PushPullError::DuplicateKey { reason },
            404 => PushPullError::MissingOps { reason },
            405 => PushPullError::NoDatatypeToSubscribe { reason },
            _ => return None,
        };
        Some(err)
    }

    pub fn reason(&self) -> &str {
        match self {
            PushPullError::AbortionOfServer { reason }
            | PushPullError::AbortionOfClient { reason }
            | PushPullError::DuplicateKey { reason }
            | PushPullError::MissingOps { reason }
            | PushPullError::NoDatatypeToSubscribe { reason } => reason,
        }
    }

    /// Check if the pack can simply be sent again later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PushPullError::AbortionOfServer { .. } | PushPullError::MissingOps { .. }
        )
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, PushPullError::DuplicateKey { .. })
    }

    pub fn is_missing_ops(&self) -> bool {
        matches!(self, PushPullError::MissingOps { .. })
    }

    pub fn is_no_datatype_to_subscribe(&self) -> bool {
        matches!(self, PushPullError::NoDatatypeToSubscribe { .. })
    }

    pub fn is_abortion_of_server(&self) -> bool {
        matches!(self, PushPullError::AbortionOfServer { .. })
    }
}

impl From<PushPullError> for crate::Error {
    fn from(err: PushPullError) -> Self {
        crate::Error::PushPull(err)
    }
}
