//! Error types for datatype operations.
//!
//! Covers failures raised by the snapshot engines, the transaction layer and
//! the wired layer while applying push-pull packs.

use thiserror::Error;

/// Structured error types for datatype operations.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatatypeError {
    /// The datatype could not be created
    #[error("failed to create datatype: {reason}")]
    Create { reason: String },

    /// Subscribing to the datatype failed
    #[error("failed to subscribe datatype: {reason}")]
    Subscribe { reason: String },

    /// A transaction could not be completed or rolled back
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    /// A snapshot could not be produced or applied
    #[error("snapshot failed: {reason}")]
    Snapshot { reason: String },

    /// An operation received out-of-range or malformed arguments
    #[error("illegal parameters: {reason}")]
    IllegalParameters { reason: String },

    /// An operation was applied to the wrong kind of target
    #[error("illegal operation: {reason}")]
    IllegalOperation { reason: String },

    /// The parent node addressed by an operation does not exist
    #[error("invalid parent: {reason}")]
    InvalidParent { reason: String },

    /// The operation would not change anything
    #[error("no-op: {reason}")]
    NoOp { reason: String },

    /// Encoding or decoding of a payload failed
    #[error("marshal failed: {reason}")]
    Marshal { reason: String },

    /// A remote operation referenced a target that cannot be found
    #[error("no target: {reason}")]
    NoTarget { reason: String },

    /// A patch could not be applied
    #[error("invalid patch: {reason}")]
    InvalidPatch { reason: String },

    /// Internal state is inconsistent
    #[error("corrupted state: {reason}")]
    Corruption { reason: String },
}

impl DatatypeError {
    pub(crate) fn illegal_parameters(reason: impl Into<String>) -> Self {
        DatatypeError::IllegalParameters {
            reason: reason.into(),
        }
    }

    pub(crate) fn illegal_operation(reason: impl Into<String>) -> Self {
        DatatypeError::IllegalOperation {
            reason: reason.into(),
        }
    }

    pub(crate) fn no_op(reason: impl Into<String>) -> Self {
        DatatypeError::NoOp {
            reason: reason.into(),
        }
    }

    pub(crate) fn corruption(reason: impl Into<String>) -> Self {
        DatatypeError::Corruption {
            reason: reason.into(),
        }
    }

    /// Stable numeric code carried by error operations.
    pub fn code(&self) -> u32 {
        match self {
            DatatypeError::Create { .. } => 201,
            DatatypeError::Subscribe { .. } => 202,
            DatatypeError::Transaction { .. } => 203,
            DatatypeError::Snapshot { .. } => 204,
            DatatypeError::IllegalParameters { .. } => 205,
            DatatypeError::IllegalOperation { .. } => 206,
            DatatypeError::InvalidParent { .. } => 207,
            DatatypeError::NoOp { .. } => 208,
            DatatypeError::Marshal { .. } => 209,
            DatatypeError::NoTarget { .. } => 210,
            DatatypeError::InvalidPatch { .. } => 211,
            DatatypeError::Corruption { .. } => 212,
        }
    }

    /// Rebuild an error from its code and message.
    pub fn from_code(code: u32, reason: impl Into<String>) -> Option<Self> {
        let reason = reason.into();
        let err = match code {
            201 => DatatypeError::Create { reason },
            202 => DatatypeError::Subscribe { reason },
            203 => DatatypeError::Transaction { reason },
            204 => DatatypeError::Snapshot { reason },
            205 => DatatypeError::IllegalParameters { reason },
            206 => DatatypeError::IllegalOperation { reason },
            207 => DatatypeError::InvalidParent { reason },
            208 => DatatypeError::NoOp { reason },
            209 => DatatypeError::Marshal { reason },
            210 => DatatypeError::NoTarget { reason },
            211 => DatatypeError::InvalidPatch { reason },
            212 => DatatypeError::Corruption { reason },
            _ => return None,
        };
        Some(err)
    }

    /// The message without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            DatatypeError::Create { reason }
            | DatatypeError::Subscribe { reason }
            | DatatypeError::Transaction { reason }
            | DatatypeError::Snapshot { reason }
            | DatatypeError::IllegalParameters { reason }
            | DatatypeError::IllegalOperation { reason }
            | DatatypeError::InvalidParent { reason }
            | DatatypeError::NoOp { reason }
            | DatatypeError::Marshal { reason }
            | DatatypeError::NoTarget { reason }
            | DatatypeError::InvalidPatch { reason }
            | DatatypeError::Corruption { reason } => reason,
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, DatatypeError::NoOp { .. })
    }

    /// Check if this error was caused by caller-supplied arguments
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            DatatypeError::IllegalParameters { .. }
                | DatatypeError::IllegalOperation { .. }
                | DatatypeError::InvalidParent { .. }
        )
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, DatatypeError::Corruption { .. })
    }

    pub fn is_transaction_error(&self) -> bool {
        matches!(self, DatatypeError::Transaction { .. })
    }

    pub fn is_subscribe_error(&self) -> bool {
        matches!(self, DatatypeError::Subscribe { .. })
    }
}

impl From<DatatypeError> for crate::Error {
    fn from(err: DatatypeError) -> Self {
        crate::Error::Datatype(err)
    }
}
