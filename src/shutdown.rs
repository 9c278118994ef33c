//! Interrupt-driven shutdown signalling.
//!
//! The accept loop watches a `watch::Receiver<bool>`; Ctrl-C flips it.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Create a shutdown channel, initially not signalled.
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Flip `trigger` to `true` on the first Ctrl-C.
pub fn on_ctrl_c(trigger: watch::Sender<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                let _ = trigger.send(true);
            }
            Err(e) => warn!(error = %e, "Unable to listen for interrupt signal"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_starts_unsignalled() {
        let (tx, mut rx) = channel();
        assert!(!*rx.borrow());

        tx.send(true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
