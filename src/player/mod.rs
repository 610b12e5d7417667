//! Client-side playback synchronization with the remote engine.
//!
//! [`PlaybackSession`] owns everything that is mutable in the player: the
//! single-flight command gate, the published [`NowPlaying`] value, the
//! interpolation anchor, the position-tracking loops and the sleep timer.

use crate::engine::models::Audiobook;
use crate::engine::EngineApiContract;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, watch, Mutex as TokioMutex};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

mod chapters;
mod command_handler;
mod error;
mod gate;
mod sleep_timer;
mod state;
mod task_manager;
mod tracker;

pub use chapters::{normalize_path, resolve_chapter, ChapterDirection, ChapterMatch};
pub use command_handler::{MAX_SPEED, MIN_SPEED};
pub use error::PlayerError;
pub use gate::{CommandGate, CommandKind, GateGuard};
pub use sleep_timer::{OnExpireCallback, SleepTimer, SleepTimerPhase, SleepTimerSnapshot};
pub use state::{InterpolationAnchor, NowPlaying, SessionEvent};
pub use task_manager::ManagedTask;

pub(crate) const PLAYER_LOG_TARGET: &str = "r_bookcli::player";

/// Timing parameters of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Period of the authoritative status poll.
    pub poll_interval: StdDuration,
    /// Period of the local interpolation tick.
    pub interpolation_interval: StdDuration,
    /// Interpolated moves smaller than this (seconds) are not published.
    pub interpolation_epsilon: f64,
    /// How long after a chapter switch engine-reported files are not trusted.
    pub chapter_settle_delay: StdDuration,
    pub sleep_fade_duration: StdDuration,
    pub sleep_fade_steps: u32,
    /// Grace period for background tasks to exit before they are aborted.
    pub task_shutdown_timeout: StdDuration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: StdDuration::from_millis(500),
            interpolation_interval: StdDuration::from_millis(16),
            interpolation_epsilon: 0.01,
            chapter_settle_delay: StdDuration::from_millis(300),
            sleep_fade_duration: StdDuration::from_secs(30),
            sleep_fade_steps: 30,
            task_shutdown_timeout: StdDuration::from_secs(2),
        }
    }
}

/// A single playback session against one engine.
pub struct PlaybackSession {
    engine: Arc<dyn EngineApiContract>,
    config: SessionConfig,
    gate: CommandGate,

    // --- Published state ---
    now_playing_tx: watch::Sender<NowPlaying>,
    event_tx: broadcast::Sender<SessionEvent>,

    // --- Local state ---
    anchor: TokioMutex<InterpolationAnchor>,
    loaded: TokioMutex<Option<Audiobook>>,
    /// Until this instant, polled `current_file` values are not used to
    /// re-resolve the current chapter.
    chapter_settle: TokioMutex<Option<chapters::ChapterSettle>>,

    // --- Background activity ---
    tracker: TokioMutex<Option<tracker::TrackerTasks>>,
    sleep_timer: SleepTimer,
}

impl PlaybackSession {
    /// Creates a new session. Nothing runs in the background until an
    /// audiobook is loaded or playback is started.
    pub fn new(engine: Arc<dyn EngineApiContract>, config: SessionConfig) -> Arc<Self> {
        Self::with_event_capacity(engine, config, 64)
    }

    pub fn with_event_capacity(
        engine: Arc<dyn EngineApiContract>,
        config: SessionConfig,
        event_capacity: usize,
    ) -> Arc<Self> {
        let (now_playing_tx, _) = watch::channel(NowPlaying::default());
        let (event_tx, _) = broadcast::channel(event_capacity);
        let sleep_timer = SleepTimer::new(
            engine.clone(),
            now_playing_tx.subscribe(),
            event_tx.clone(),
            config.sleep_fade_duration,
            config.sleep_fade_steps,
            config.task_shutdown_timeout,
        );

        Arc::new(PlaybackSession {
            engine,
            gate: CommandGate::new(),
            now_playing_tx,
            event_tx,
            anchor: TokioMutex::new(InterpolationAnchor::new(0.0, Instant::now())),
            loaded: TokioMutex::new(None),
            chapter_settle: TokioMutex::new(None),
            tracker: TokioMutex::new(None),
            sleep_timer,
            config,
        })
    }

    /// Subscribes to the reactive "now playing" value.
    pub fn subscribe(&self) -> watch::Receiver<NowPlaying> {
        self.now_playing_tx.subscribe()
    }

    /// Subscribes to discrete session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Current value of the published state.
    pub fn now_playing(&self) -> NowPlaying {
        self.now_playing_tx.borrow().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn gate(&self) -> &CommandGate {
        &self.gate
    }

    pub fn sleep_timer(&self) -> &SleepTimer {
        &self.sleep_timer
    }

    pub async fn anchor(&self) -> InterpolationAnchor {
        *self.anchor.lock().await
    }

    pub async fn loaded_audiobook(&self) -> Option<Audiobook> {
        self.loaded.lock().await.clone()
    }

    // --- Private Helper Methods ---

    /// Sends an event, logging when nobody listens.
    fn broadcast_event(&self, event: SessionEvent) {
        trace!(target: PLAYER_LOG_TARGET, "Broadcasting session event: {:?}", event);
        if self.event_tx.send(event.clone()).is_err() {
            debug!(target: PLAYER_LOG_TARGET, "No active listeners for session event: {:?}", event);
        }
    }

    async fn ensure_loaded(&self) -> Result<(), PlayerError> {
        if self.loaded.lock().await.is_some() {
            Ok(())
        } else {
            Err(PlayerError::NoAudiobookLoaded)
        }
    }

    /// Stops the tracking loops and the sleep timer. The session can be
    /// reused afterwards by loading or playing again.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!(target: PLAYER_LOG_TARGET, "Shutting down playback session.");
        self.stop_tracking().await;
        if self.sleep_timer.is_running().await {
            if let Err(e) = self.sleep_timer.stop().await {
                warn!(target: PLAYER_LOG_TARGET, "Failed to restore volume while stopping sleep timer: {}", e);
            }
        }
        info!(target: PLAYER_LOG_TARGET, "Playback session shut down.");
    }
}
