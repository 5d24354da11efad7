//! Change notifications published after push-pull commits.

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{Result, pushpull::Notification};

/// Publisher of change notifications. Delivery is best effort and never
/// retried.
#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify(&self, topic: &str, notification: Notification) -> Result<()>;

    /// Receiver of everything published from now on, for in-process
    /// subscribers.
    fn subscribe(&self) -> Option<broadcast::Receiver<(String, Notification)>> {
        None
    }
}

/// Notifier that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _topic: &str, _notification: Notification) -> Result<()> {
        Ok(())
    }
}

/// Notifier fanning out to in-process subscribers over a tokio broadcast
/// channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<(String, Notification)>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, topic: &str, notification: Notification) -> Result<()> {
        // no subscribers is not an error
        let receivers = self
            .sender
            .send((topic.to_string(), notification))
            .unwrap_or(0);
        trace!(topic, receivers, "notification published");
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<(String, Notification)>> {
        Some(self.sender.subscribe())
    }
}
