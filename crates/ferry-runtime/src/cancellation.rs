//! Cooperative cancellation (§9's open question): a producer shutdown
//! signals its executors rather than relying on them to poll the job row's
//! state. Built on `tokio::sync::watch` to keep the dependency list aligned
//! with the teacher's preference for plain `tokio::sync` primitives over an
//! additional cancellation-token crate.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

pub fn cancellation_pair() -> (CancellationSource, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancellationSource { tx }, CancellationToken { rx })
}

impl CancellationSource {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called. Intended to be raced
    /// against the user's `perform` future in a `tokio::select!`.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}
