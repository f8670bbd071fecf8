//! Timer-driven poll loop.
//!
//! The first cycle runs immediately.  A stop request is only observed
//! between cycles, so an in-flight cycle always completes before
//! [`Poller::stop`] returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use super::Arbiter;

pub(crate) struct Poller {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    pub(crate) fn spawn(arbiter: Arc<Arbiter>, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow cycle must not cause a burst of catch-up polls.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => arbiter.poll_once().await,
                }
            }
            debug!("poll loop exited");
        });

        Self { stop_tx, handle }
    }

    /// Signal the loop and wait for it to wind down.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "poll task ended abnormally");
        }
    }
}
