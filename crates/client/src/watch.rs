//! Periodic notification polling.
//!
//! [`NotificationPoller`] refreshes a [`NotificationAggregator`] on a fixed
//! interval until cancelled. Polling only reads; watermarks stay where the
//! last mark-read left them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kidneysphere_core::backend::SiteBackend;
use kidneysphere_core::watermark::WatermarkStore;

use crate::notifications::{NotificationAggregator, NotificationError, NotificationSnapshot};

// ---------------------------------------------------------------------------
// NotificationPoller
// ---------------------------------------------------------------------------

/// Background loop that keeps a notification view fresh.
pub struct NotificationPoller<B, S> {
    aggregator: Arc<NotificationAggregator<B, S>>,
    interval: Duration,
}

impl<B: SiteBackend, S: WatermarkStore> NotificationPoller<B, S> {
    pub fn new(aggregator: Arc<NotificationAggregator<B, S>>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    /// Run the polling loop.
    ///
    /// The first refresh happens immediately. `on_snapshot` is called after
    /// every successful refresh. Signing out or losing configuration ends
    /// the loop; other failures are logged and retried on the next tick.
    /// Returns the number of successful refreshes.
    pub async fn run<F>(&self, cancel: CancellationToken, mut on_snapshot: F) -> usize
    where
        F: FnMut(&NotificationSnapshot),
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut refreshes = 0;
        let mut last_unread = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(refreshes, "Notification poller cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.aggregator.refresh().await {
                        Ok(snapshot) => {
                            refreshes += 1;
                            let unread = snapshot.total_unread();
                            if last_unread != Some(unread) {
                                tracing::info!(unread, "Unread notifications changed");
                                last_unread = Some(unread);
                            }
                            on_snapshot(&snapshot);
                        }
                        Err(e @ (NotificationError::NotSignedIn | NotificationError::NotConfigured)) => {
                            tracing::error!(error = %e, "Notification poller stopping");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to refresh notifications");
                        }
                    }
                }
            }
        }

        refreshes
    }
}
