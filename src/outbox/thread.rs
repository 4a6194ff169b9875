//! Threaded relay for background outbox draining.
//!
//! This module provides a background thread that drains the outbox
//! and publishes events to the stream.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info};

use super::relay::Relay;
use super::store::OutboxStore;
use crate::stream::StreamProducer;

const PURGE_EVERY: Duration = Duration::from_secs(60);

/// Statistics from the relay thread.
#[derive(Debug, Default, Clone)]
pub struct RelayStats {
    pub polls: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    pub purged: usize,
    pub errors: usize,
}

/// A background thread that runs a [`Relay`] in a polling loop.
///
/// ## Example
///
/// ```ignore
/// let relay = Relay::new(store.clone(), stream.clone());
/// let relay_thread = RelayThread::spawn(relay, Duration::from_millis(50));
///
/// // ... domain transactions append to the outbox ...
///
/// let stats = relay_thread.stop();
/// println!("Relayed {} records", stats.published);
/// ```
pub struct RelayThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RelayStats>>,
}

impl RelayThread {
    /// Spawn the relay loop.
    ///
    /// After a full batch the loop claims again immediately to drain a
    /// backlog; otherwise it waits `poll_interval` between passes. A stop
    /// signal is only observed between passes, so a claimed batch is always
    /// finished.
    pub fn spawn<S, P>(relay: Relay<S, P>, poll_interval: Duration) -> Self
    where
        S: OutboxStore + 'static,
        P: StreamProducer + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = RelayStats::default();
            let mut last_purge = Instant::now();
            info!("outbox relay started");

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;
                let drained_full_batch = match relay.run_once() {
                    Ok(report) => {
                        stats.published += report.published;
                        stats.failed += report.failed;
                        stats.dead_lettered += report.dead_lettered;
                        report.claimed >= relay.batch_size() && report.claimed > 0
                    }
                    Err(err) => {
                        stats.errors += 1;
                        error!(error = %err, "relay pass failed");
                        false
                    }
                };

                if last_purge.elapsed() >= PURGE_EVERY {
                    last_purge = Instant::now();
                    match relay.purge() {
                        Ok(purged) => stats.purged += purged,
                        Err(err) => {
                            stats.errors += 1;
                            error!(error = %err, "outbox purge failed");
                        }
                    }
                }

                if drained_full_batch {
                    continue;
                }

                match stop_rx.recv_timeout(poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            info!(
                polls = stats.polls,
                published = stats.published,
                dead_lettered = stats.dead_lettered,
                "outbox relay stopped"
            );
            stats
        });

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Signal the relay to stop and wait for it to finish its current batch.
    /// Returns the relay statistics.
    pub fn stop(mut self) -> RelayStats {
        let _ = self.stop_tx.send(());
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => RelayStats::default(),
        }
    }

    /// Signal the relay to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for RelayThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        // Don't join on drop - let the thread finish its batch naturally
    }
}
