//! Constants used throughout the Orda library.

/// Tag of the implicit transaction wrapping a single operation.
pub const SENTINEL_TAG: &str = "_sentinel";

/// Committed operations kept for rollback before the rollback snapshot is
/// refreshed.
pub const ROLLBACK_LOG_LIMIT: usize = 100;

/// Default collection used by clients that do not configure one.
pub const DEFAULT_COLLECTION: &str = "orda";

/// Default number of server sequences between stored snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 64;

/// HTTP path of the client registration endpoint.
pub const CLIENT_PATH: &str = "/api/v1/client";

/// HTTP path of the push-pull endpoint.
pub const PUSHPULL_PATH: &str = "/api/v1/pushpull";

/// HTTP path of the health endpoint.
pub const HEALTH_PATH: &str = "/health";
