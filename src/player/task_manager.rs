// src/player/task_manager.rs

use crate::player::PLAYER_LOG_TARGET;
use std::future::Future;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace};

/// A spawned background activity (poll loop, interpolation loop, timer)
/// that can be told to shut down and then awaited.
#[derive(Debug)]
pub struct ManagedTask {
    task_handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
    name: &'static str,
    shutdown_timeout: StdDuration,
}

impl ManagedTask {
    /// Spawns `body`, handing it the receiving end of the shutdown signal.
    ///
    /// The receiver also resolves (with `Closed`) if the `ManagedTask` is
    /// dropped without being stopped, so bodies only need one select arm.
    pub fn spawn<F, Fut>(name: &'static str, shutdown_timeout: StdDuration, body: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        trace!(target: PLAYER_LOG_TARGET, task = name, "Spawning background task.");
        let task_handle = tokio::spawn(body(shutdown_rx));
        ManagedTask {
            task_handle,
            shutdown_tx,
            name,
            shutdown_timeout,
        }
    }

    fn signal_shutdown(&self) {
        debug!(target: PLAYER_LOG_TARGET, task = self.name, "Sending shutdown signal.");
        if let Err(e) = self.shutdown_tx.send(()) {
            // Expected when the task already finished on its own.
            trace!(target: PLAYER_LOG_TARGET, task = self.name, "Failed to send shutdown signal (receiver likely dropped): {}", e);
        }
    }

    /// Waits for the task to finish, aborting it after the shutdown timeout.
    #[instrument(skip(self), fields(task = self.name))]
    async fn await_completion(mut self) {
        tokio::select! {
            biased;
            result = &mut self.task_handle => {
                match result {
                    Ok(()) => trace!(target: PLAYER_LOG_TARGET, task = self.name, "Task finished gracefully."),
                    Err(e) if e.is_panic() => error!(target: PLAYER_LOG_TARGET, task = self.name, "Task panicked: {:?}", e),
                    Err(e) if e.is_cancelled() => debug!(target: PLAYER_LOG_TARGET, task = self.name, "Task was cancelled."),
                    Err(e) => error!(target: PLAYER_LOG_TARGET, task = self.name, "Task join error: {:?}", e),
                }
            }
            _ = tokio::time::sleep(self.shutdown_timeout) => {
                error!(target: PLAYER_LOG_TARGET, task = self.name, "Timeout waiting for task to finish after {:?}. Aborting task.", self.shutdown_timeout);
                self.task_handle.abort();
            }
        }
    }

    /// Signals shutdown and waits for the task to exit.
    pub async fn stop(self) {
        let name = self.name;
        self.signal_shutdown();
        self.await_completion().await;
        debug!(target: PLAYER_LOG_TARGET, task = name, "Background task stopped.");
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
