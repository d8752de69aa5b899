//! # Scheduler Loop
//!
//! A single background task that runs a tick function on a fixed interval
//! until it is told to stop.
//!
//! Each tick runs in its own task so that a panicking tick is reported and
//! counted instead of ending the loop. Stopping sends a broadcast signal and
//! waits for the loop with a bounded timeout, aborting it if the timeout
//! passes.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::monitoring;
use crate::types::{Error, Result};

/// Periodic background runner with an explicit start/stop lifecycle
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    interval: Duration,
    stop_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>, interval: Duration, stop_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            name: name.into(),
            interval,
            stop_timeout,
            shutdown_tx,
            worker_handle: Mutex::new(None),
        }
    }

    /// True while the loop task is alive
    pub fn is_running(&self) -> bool {
        self.worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Spawns the loop. The first tick runs immediately. Fails if the loop is
    /// already running.
    pub fn start<F, Fut>(&self, tick: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut worker_handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if worker_handle.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return Err(Error::Lifecycle(format!("{} is already running", self.name)));
        }

        let name = self.name.clone();
        let period = self.interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(scheduler = %name, "Shutdown signal received");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = tokio::spawn(tick()).await {
                            monitoring::record_tick_failure();
                            error!(scheduler = %name, error = %e, "Scheduler tick failed");
                        }
                    }
                }
            }

            info!(scheduler = %name, "Scheduler loop exited");
        });

        *worker_handle = Some(handle);
        info!(scheduler = %self.name, interval_secs = period.as_secs(), "Scheduler started");
        Ok(())
    }

    /// Signals the loop to stop and waits up to the stop timeout for it to
    /// exit. Stopping a scheduler that is not running only logs a warning.
    pub async fn stop(&self) {
        let handle = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut handle) = handle else {
            warn!(scheduler = %self.name, "Scheduler is not running");
            return;
        };

        let _ = self.shutdown_tx.send(());

        match timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => info!(scheduler = %self.name, "Scheduler stopped"),
            Ok(Err(e)) => warn!(scheduler = %self.name, error = %e, "Scheduler task ended abnormally"),
            Err(_) => {
                warn!(
                    scheduler = %self.name,
                    timeout_secs = self.stop_timeout.as_secs(),
                    "Scheduler did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }
}
