// src/player/tracker.rs
//
// Authoritative status poll plus local interpolation between polls.

use super::task_manager::ManagedTask;
use super::{InterpolationAnchor, PlaybackSession, PlayerError, PLAYER_LOG_TARGET};
use crate::engine::models::{PlaybackState, PlaybackStatus};
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

/// Handles of the running tracking loops.
pub(crate) struct TrackerTasks {
    poll: ManagedTask,
    interpolation: ManagedTask,
    follow_ups: Vec<ManagedTask>,
}

impl TrackerTasks {
    async fn stop(self) {
        for task in self.follow_ups {
            task.stop().await;
        }
        self.interpolation.stop().await;
        self.poll.stop().await;
    }
}

impl PlaybackSession {
    /// Whether the poll and interpolation loops are running.
    pub async fn is_tracking(&self) -> bool {
        self.tracker.lock().await.is_some()
    }

    /// Starts both tracking loops unless they already run.
    pub(crate) async fn ensure_tracking(self: &Arc<Self>) {
        let mut tracker = self.tracker.lock().await;
        if tracker.is_some() {
            return;
        }
        info!(target: PLAYER_LOG_TARGET, poll = ?self.config.poll_interval, interpolation = ?self.config.interpolation_interval, "Starting position tracking loops.");

        let timeout = self.config.task_shutdown_timeout;
        let poll_session = Arc::downgrade(self);
        let poll_period = self.config.poll_interval;
        let poll = ManagedTask::spawn("status-poll", timeout, move |shutdown_rx| {
            run_poll_loop(poll_session, poll_period, shutdown_rx)
        });

        let tick_session = Arc::downgrade(self);
        let tick_period = self.config.interpolation_interval;
        let interpolation = ManagedTask::spawn("interpolation", timeout, move |shutdown_rx| {
            run_interpolation_loop(tick_session, tick_period, shutdown_rx)
        });

        *tracker = Some(TrackerTasks {
            poll,
            interpolation,
            follow_ups: Vec::new(),
        });
    }

    /// Cancels both loops and any pending follow-up poll.
    pub(crate) async fn stop_tracking(&self) {
        let tasks = self.tracker.lock().await.take();
        if let Some(tasks) = tasks {
            info!(target: PLAYER_LOG_TARGET, "Stopping position tracking loops.");
            tasks.stop().await;
        }
    }

    /// Schedules one extra poll after `delay`, cancelled together with the loops.
    pub(crate) async fn schedule_follow_up_refresh(self: &Arc<Self>, delay: StdDuration) {
        let mut tracker = self.tracker.lock().await;
        let Some(tasks) = tracker.as_mut() else {
            debug!(target: PLAYER_LOG_TARGET, "Tracking inactive; not scheduling follow-up poll.");
            return;
        };
        tasks.follow_ups.retain(|task| !task.is_finished());

        let session = Arc::downgrade(self);
        let task = ManagedTask::spawn(
            "follow-up-poll",
            self.config.task_shutdown_timeout,
            move |mut shutdown_rx| async move {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {}
                    _ = tokio::time::sleep(delay) => {
                        if let Some(session) = session.upgrade() {
                            if let Err(e) = session.refresh_status().await {
                                warn!(target: PLAYER_LOG_TARGET, "Follow-up poll failed: {}", e);
                            }
                        }
                    }
                }
            },
        );
        tasks.follow_ups.push(task);
    }

    /// Fetches ground truth from the engine and overwrites the local status
    /// and the interpolation anchor.
    #[instrument(skip(self))]
    pub async fn refresh_status(&self) -> Result<PlaybackStatus, PlayerError> {
        let status = self
            .engine
            .get_status()
            .await
            .map_err(|e| PlayerError::StatusUnavailable(e.to_string()))?
            .sanitized();
        let now = Instant::now();

        {
            let mut anchor = self.anchor.lock().await;
            *anchor = InterpolationAnchor::new(status.position, now);
            self.now_playing_tx.send_modify(|np| np.status = status.clone());
        }
        trace!(target: PLAYER_LOG_TARGET, state = %status.state, position = status.position, "Status refreshed.");

        self.sync_current_chapter(&status).await;
        Ok(status)
    }

    /// Publishes an extrapolated position if playing and the move exceeds epsilon.
    ///
    /// Returns true if the published position changed.
    pub(crate) async fn interpolate_tick(&self) -> bool {
        let anchor = self.anchor.lock().await;
        let epsilon = self.config.interpolation_epsilon;
        let now = Instant::now();
        self.now_playing_tx.send_if_modified(|np| {
            if np.status.state != PlaybackState::Playing {
                return false;
            }
            let interpolated = anchor.interpolate(now, np.status.speed, np.status.duration);
            if (interpolated - np.status.position).abs() > epsilon {
                np.status.position = interpolated;
                true
            } else {
                false
            }
        })
    }
}

async fn run_poll_loop(
    session: Weak<PlaybackSession>,
    period: StdDuration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(target: PLAYER_LOG_TARGET, "Status poll loop started.");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else { break };
                // Poll failures are expected and self-healing; retry on schedule.
                if let Err(e) = session.refresh_status().await {
                    warn!(target: PLAYER_LOG_TARGET, "{}", e);
                }
            }
        }
    }
    debug!(target: PLAYER_LOG_TARGET, "Status poll loop finished.");
}

async fn run_interpolation_loop(
    session: Weak<PlaybackSession>,
    period: StdDuration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(target: PLAYER_LOG_TARGET, "Interpolation loop started.");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let Some(session) = session.upgrade() else { break };
                session.interpolate_tick().await;
            }
        }
    }
    debug!(target: PLAYER_LOG_TARGET, "Interpolation loop finished.");
}
