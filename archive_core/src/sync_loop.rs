// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A background ticker that periodically flushes an archiver's bulk writer(s), mirroring
//! `doSync()` in the Go original: ticks on an interval (default 5s there), flushing on
//! every tick, and performs exactly one final flush before exiting when asked to shut
//! down. Uses a `tokio::sync::watch` channel for the shutdown signal, the same primitive
//! `grpc_util::infra::setup_infra_endpoints` uses for its own shutdown signal.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ArchiveError;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// A running sync loop. Dropping this without calling `shutdown` leaves the background
/// task running detached; archivers always call `shutdown` from their own `Shutdown`.
pub struct SyncLoop {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<()>,
}

impl SyncLoop {
    /// Spawns the loop. `flush` is invoked on every tick and exactly once more, inline,
    /// when shutdown is requested — even if that happens mid-flush, the in-flight flush is
    /// allowed to complete before the final one runs.
    pub fn spawn<F, Fut>(interval: Duration, mut flush: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ArchiveError>> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the loop waits a full interval
            // before its first periodic flush.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = flush().await {
                            tracing::warn!(%err, "periodic sync flush failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if let Err(err) = flush().await {
                            tracing::warn!(%err, "final sync flush on shutdown failed");
                        }
                        break;
                    }
                }
            }
        });

        SyncLoop {
            handle,
            shutdown_tx,
        }
    }

    /// Signals the loop to perform its final flush and exit, then waits for it to do so.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn flushes_on_every_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let loop_count = count.clone();
        let sync_loop = SyncLoop::spawn(Duration::from_millis(100), move || {
            let count = loop_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::advance(Duration::from_millis(350)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 3);

        sync_loop.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_runs_exactly_one_final_flush_with_no_prior_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let loop_count = count.clone();
        let sync_loop = SyncLoop::spawn(Duration::from_secs(3600), move || {
            let count = loop_count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        sync_loop.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
