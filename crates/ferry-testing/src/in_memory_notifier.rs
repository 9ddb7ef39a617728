//! An always-reachable, in-process `Notifier`. Lets producer/stager tests
//! exercise the notify-wakes-fetch path without a database round trip.

use async_trait::async_trait;
use ferry_core::notifier::{Channel, Notification};
use ferry_core::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

pub struct InMemoryNotifier {
    tx: broadcast::Sender<Notification>,
    reachable: AtomicBool,
}

impl Default for InMemoryNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            reachable: AtomicBool::new(true),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Flips the value `is_reachable` reports, so tests can exercise the
    /// local-mode fallback producers take when pub/sub looks unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }
}

#[async_trait]
impl ferry_core::Notifier for InMemoryNotifier {
    async fn notify_encoded(&self, channel: Channel, encoded: &str) -> Result<()> {
        let _ = self.tx.send(Notification {
            channel,
            raw: encoded.to_string(),
        });
        Ok(())
    }

    async fn listen(&self, _channels: &[Channel]) -> Result<()> {
        Ok(())
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }
}
