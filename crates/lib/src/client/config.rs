//! Client configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COLLECTION;

/// How a client learns about remote changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Sync only when [`super::Client::sync`] is called
    #[default]
    Manual,
    /// Additionally sync whenever the server reports a change
    Realtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Collection the client's datatypes belong to
    pub collection: String,
    /// Human readable name attached to requests and logs
    pub alias: String,
    pub sync_type: SyncType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            alias: "orda-client".to_string(),
            sync_type: SyncType::Manual,
        }
    }
}

impl ClientConfig {
    pub fn new(collection: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            alias: alias.into(),
            ..Default::default()
        }
    }

    pub fn with_sync_type(mut self, sync_type: SyncType) -> Self {
        self.sync_type = sync_type;
        self
    }
}
