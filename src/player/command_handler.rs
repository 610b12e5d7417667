// src/player/command_handler.rs
//
// Transport commands: optimistic local update, remote call, rollback on failure.

use super::{
    CommandKind, InterpolationAnchor, OnExpireCallback, PlaybackSession, PlayerError, SessionEvent,
    PLAYER_LOG_TARGET,
};
use crate::engine::models::{Audiobook, PlaybackState};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 3.0;

/// Transport changes applied optimistically. Stop is not one of them.
#[derive(Debug, Clone, Copy)]
enum Transition {
    Play,
    Pause,
}

impl Transition {
    fn target(self) -> PlaybackState {
        match self {
            Transition::Play => PlaybackState::Playing,
            Transition::Pause => PlaybackState::Paused,
        }
    }
}

impl PlaybackSession {
    /// Loads an audiobook on the engine and resets local state to its start.
    #[instrument(skip(self, audiobook), fields(audiobook_id = %audiobook.id))]
    pub async fn load_audio(self: &Arc<Self>, audiobook: Audiobook) -> Result<(), PlayerError> {
        let result = self
            .gate
            .guarded(CommandKind::Load, || self.load_audio_inner(audiobook))
            .await;
        result.unwrap_or_else(|| {
            debug!(target: PLAYER_LOG_TARGET, "Load dropped; another load is in flight.");
            Ok(())
        })
    }

    async fn load_audio_inner(self: &Arc<Self>, audiobook: Audiobook) -> Result<(), PlayerError> {
        info!(target: PLAYER_LOG_TARGET, file_path = %audiobook.file_path, "Loading audiobook.");
        self.now_playing_tx.send_modify(|np| np.loading = true);

        let known_chapters = {
            let np = self.now_playing_tx.borrow();
            (np.audiobook_id.as_deref() == Some(audiobook.id.as_str()) && !np.chapters.is_empty())
                .then(|| np.chapters.clone())
        };
        let chapters = match known_chapters {
            Some(chapters) => {
                debug!(target: PLAYER_LOG_TARGET, "Reusing chapter list of the loaded audiobook.");
                chapters
            }
            None => Arc::new(self.fetch_chapters(&audiobook.id).await),
        };

        if let Err(e) = self.engine.load(&audiobook.file_path).await {
            warn!(target: PLAYER_LOG_TARGET, "Engine failed to load audiobook: {}", e);
            self.now_playing_tx.send_modify(|np| np.loading = false);
            return Err(PlayerError::remote("load", e));
        }

        let audiobook_id = audiobook.id.clone();
        *self.loaded.lock().await = Some(audiobook);
        *self.chapter_settle.lock().await = None;
        {
            let mut anchor = self.anchor.lock().await;
            *anchor = InterpolationAnchor::new(0.0, Instant::now());
            self.now_playing_tx.send_modify(|np| {
                np.audiobook_id = Some(audiobook_id.clone());
                np.current_chapter_id = chapters.first().map(|c| c.id.clone());
                np.chapters = chapters.clone();
                np.status.state = PlaybackState::Stopped;
                np.status.position = 0.0;
                np.status.duration = None;
                np.status.current_file = None;
                np.loading = false;
            });
        }

        self.ensure_tracking().await;
        info!(target: PLAYER_LOG_TARGET, chapters = chapters.len(), "Audiobook loaded.");
        self.broadcast_event(SessionEvent::Loaded {
            audiobook_id,
            chapter_count: chapters.len(),
        });

        if let Err(e) = self.refresh_status().await {
            warn!(target: PLAYER_LOG_TARGET, "Initial status refresh after load failed: {}", e);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn play(self: &Arc<Self>) -> Result<(), PlayerError> {
        self.ensure_loaded().await?;
        let result = self
            .gate
            .guarded(CommandKind::Play, || self.transition(Transition::Play))
            .await;
        match result {
            Some(Ok(())) => {
                self.ensure_tracking().await;
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                debug!(target: PLAYER_LOG_TARGET, "Play dropped; already in flight.");
                Ok(())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_loaded().await?;
        let result = self
            .gate
            .guarded(CommandKind::Pause, || self.transition(Transition::Pause))
            .await;
        result.unwrap_or_else(|| {
            debug!(target: PLAYER_LOG_TARGET, "Pause dropped; already in flight.");
            Ok(())
        })
    }

    /// Toggles between playing and paused based on the displayed state.
    pub async fn toggle_play_pause(self: &Arc<Self>) -> Result<(), PlayerError> {
        let playing = self.now_playing_tx.borrow().status.state == PlaybackState::Playing;
        if playing {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Applies the transition optimistically and reverts it if the engine refuses.
    async fn transition(&self, transition: Transition) -> Result<(), PlayerError> {
        let target = transition.target();
        let mut previous = target;
        self.now_playing_tx.send_if_modified(|np| {
            previous = np.status.state;
            np.status.state = target;
            previous != target
        });

        let (command, outcome) = match transition {
            Transition::Play => ("play", self.engine.play().await),
            Transition::Pause => ("pause", self.engine.pause().await),
        };

        if let Err(e) = outcome {
            warn!(target: PLAYER_LOG_TARGET, command, "Engine rejected command; rolling back to {}: {}", previous, e);
            // A poll may already have replaced the optimistic value; keep it then.
            self.now_playing_tx.send_if_modified(|np| {
                if np.status.state == target && previous != target {
                    np.status.state = previous;
                    true
                } else {
                    false
                }
            });
            return Err(PlayerError::remote(command, e));
        }
        info!(target: PLAYER_LOG_TARGET, command, "Engine accepted command.");
        Ok(())
    }

    /// Stops playback on the engine, then halts position tracking.
    ///
    /// Local state is only touched once the engine confirmed.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let result = self
            .gate
            .guarded(CommandKind::Stop, || self.stop_inner())
            .await;
        result.unwrap_or_else(|| {
            debug!(target: PLAYER_LOG_TARGET, "Stop dropped; already in flight.");
            Ok(())
        })
    }

    async fn stop_inner(&self) -> Result<(), PlayerError> {
        self.engine
            .stop()
            .await
            .map_err(|e| PlayerError::remote("stop", e))?;

        self.stop_tracking().await;
        let mut anchor = self.anchor.lock().await;
        *anchor = InterpolationAnchor::new(0.0, Instant::now());
        self.now_playing_tx.send_modify(|np| {
            np.status.state = PlaybackState::Stopped;
            np.status.position = 0.0;
        });
        info!(target: PLAYER_LOG_TARGET, "Playback stopped.");
        Ok(())
    }

    /// Seeks to `position` seconds, clamped to the known duration.
    #[instrument(skip(self))]
    pub async fn seek(&self, position: f64) -> Result<(), PlayerError> {
        self.ensure_loaded().await?;
        if !position.is_finite() {
            return Err(PlayerError::InvalidArgument(format!("seek position {} is not finite", position)));
        }

        let (previous, target) = {
            let np = self.now_playing_tx.borrow();
            let upper = np.status.duration.unwrap_or(f64::INFINITY);
            (np.status.position, position.max(0.0).min(upper))
        };
        // Interpolation extrapolates from the optimistic target while in flight.
        let previous_anchor = {
            let mut anchor = self.anchor.lock().await;
            let previous_anchor = *anchor;
            *anchor = InterpolationAnchor::new(target, Instant::now());
            self.now_playing_tx.send_modify(|np| np.status.position = target);
            previous_anchor
        };

        if let Err(e) = self.engine.seek(target).await {
            warn!(target: PLAYER_LOG_TARGET, target, "Seek failed; restoring position {}: {}", previous, e);
            let mut anchor = self.anchor.lock().await;
            *anchor = previous_anchor;
            self.now_playing_tx.send_modify(|np| np.status.position = previous);
            return Err(PlayerError::remote("seek", e));
        }

        let mut anchor = self.anchor.lock().await;
        *anchor = InterpolationAnchor::new(target, Instant::now());
        self.now_playing_tx.send_modify(|np| np.status.position = target);
        debug!(target: PLAYER_LOG_TARGET, target, "Seek applied.");
        Ok(())
    }

    /// Seeks relative to the displayed position.
    pub async fn seek_by(&self, offset: f64) -> Result<(), PlayerError> {
        let current = self.now_playing_tx.borrow().status.position;
        self.seek(current + offset).await
    }

    /// Sets the engine volume (`0.0..=1.0`).
    ///
    /// While the sleep timer is fading, the value only replaces the volume
    /// restored afterwards; the engine is left to the fade.
    #[instrument(skip(self))]
    pub async fn update_volume(&self, volume: f64) -> Result<(), PlayerError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlayerError::InvalidArgument(format!("volume {} is outside [0, 1]", volume)));
        }
        if self.sleep_timer.rebase_if_fading(volume).await {
            return Ok(());
        }

        let previous = self.now_playing_tx.borrow().status.volume;
        self.now_playing_tx.send_modify(|np| np.status.volume = volume);
        if let Err(e) = self.engine.set_volume(volume).await {
            warn!(target: PLAYER_LOG_TARGET, "Volume change failed: {}", e);
            self.now_playing_tx.send_modify(|np| np.status.volume = previous);
            return Err(PlayerError::remote("set_volume", e));
        }
        Ok(())
    }

    /// Sets the playback speed multiplier (`0.5..=3.0`).
    #[instrument(skip(self))]
    pub async fn update_speed(&self, speed: f64) -> Result<(), PlayerError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
            return Err(PlayerError::InvalidArgument(format!(
                "speed {} is outside [{}, {}]",
                speed, MIN_SPEED, MAX_SPEED
            )));
        }

        let previous = self.now_playing_tx.borrow().status.speed;
        self.now_playing_tx.send_modify(|np| np.status.speed = speed);
        if let Err(e) = self.engine.set_speed(speed).await {
            warn!(target: PLAYER_LOG_TARGET, "Speed change failed: {}", e);
            self.now_playing_tx.send_modify(|np| np.status.speed = previous);
            return Err(PlayerError::remote("set_speed", e));
        }
        Ok(())
    }

    /// Starts the sleep timer. On expiry playback is paused and the
    /// pre-fade volume restored.
    #[instrument(skip(self))]
    pub async fn start_sleep_timer(self: &Arc<Self>, minutes: u64) -> Result<(), PlayerError> {
        let session = Arc::downgrade(self);
        let event_tx = self.event_tx.clone();
        let on_expire: OnExpireCallback = Box::new(move |original_volume| {
            if event_tx.send(SessionEvent::SleepTimerExpired).is_err() {
                debug!(target: PLAYER_LOG_TARGET, "No listeners for sleep timer expiry.");
            }
            let Some(session) = session.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = session.pause().await {
                    warn!(target: PLAYER_LOG_TARGET, "Pause on sleep timer expiry failed: {}", e);
                    session.broadcast_event(SessionEvent::Error(e.to_string()));
                }
                if let Err(e) = session.update_volume(original_volume).await {
                    warn!(target: PLAYER_LOG_TARGET, "Volume restore after sleep timer failed: {}", e);
                    session.broadcast_event(SessionEvent::Error(e.to_string()));
                }
            });
        });
        self.sleep_timer.start(minutes, on_expire).await
    }

    pub async fn stop_sleep_timer(&self) -> Result<(), PlayerError> {
        self.sleep_timer.stop().await
    }

    pub async fn extend_sleep_timer(&self, minutes: u64) -> Result<(), PlayerError> {
        self.sleep_timer.extend(minutes).await
    }
}
