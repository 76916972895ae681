//! Cancellation signals.

use tokio::sync::watch;

/// A cloneable cancellation signal.
///
/// All clones observe the same state. Once cancelled, a signal stays
/// cancelled.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: watch::Sender<bool>,
}

impl Cancellation {
    /// Create a signal that has not been cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
