//! Background refresh scheduler.
//!
//! Runs one sync at startup so a cold cache warms immediately, then repeats
//! on a fixed interval. A command channel lets callers trigger an immediate
//! sync or stop the loop; stop takes effect promptly even mid-interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduled syncs.
    pub refresh_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn new(refresh_interval: Duration) -> Self {
        Self { refresh_interval }
    }
}

/// Commands accepted by a running scheduler.
#[derive(Debug)]
enum SchedulerCommand {
    RefreshNow,
    Stop,
}

/// Observable state of the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// When the last successful sync completed.
    pub last_success: Option<DateTime<Utc>>,
    /// Error message of the last failed sync, cleared on success.
    pub last_error: Option<String>,
    /// Total syncs attempted since start.
    pub runs: u64,
}

/// Handle for controlling a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Asks the scheduler to sync as soon as possible.
    pub async fn refresh_now(&self) -> bool {
        self.command_tx.send(SchedulerCommand::RefreshNow).await.is_ok()
    }

    /// Stops the scheduler loop.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(SchedulerCommand::Stop).await;
    }

    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}

/// Periodic sync driver.
///
/// Generic over the sync function so it can drive the real cache refresh in
/// production and a counter in tests.
pub struct RefreshScheduler {
    config: SchedulerConfig,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    handle: SchedulerHandle,
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        let handle = SchedulerHandle {
            command_tx,
            state: Arc::new(RwLock::new(SchedulerState::default())),
        };
        Self {
            config,
            command_rx,
            handle,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Runs the scheduler until stopped. Consumes the scheduler; use the
    /// handle obtained beforehand to control it.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            "refresh scheduler started"
        );

        // Cold-start sync before the first interval elapses.
        self.run_sync(&sync_fn).await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.refresh_interval) => {
                    self.run_sync(&sync_fn).await;
                }
                command = self.command_rx.recv() => match command {
                    Some(SchedulerCommand::RefreshNow) => {
                        debug!("immediate refresh requested");
                        self.run_sync(&sync_fn).await;
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        info!("refresh scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Runs one sync; failures are recorded and logged, never propagated.
    async fn run_sync<F, Fut>(&self, sync_fn: &F)
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let result = sync_fn().await;

        let mut state = self.handle.state.write().await;
        state.runs += 1;
        match result {
            Ok(()) => {
                state.last_success = Some(Utc::now());
                state.last_error = None;
            }
            Err(message) => {
                warn!(error = %message, "scheduled sync failed");
                state.last_error = Some(message);
            }
        }
    }
}
