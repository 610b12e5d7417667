// src/player/sleep_timer.rs
//
// Countdown that fades the engine volume out and fires a callback at zero.

use super::task_manager::ManagedTask;
use super::{NowPlaying, PlayerError, SessionEvent, PLAYER_LOG_TARGET};
use crate::engine::EngineApiContract;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, watch, Mutex as TokioMutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Invoked once when the timer reaches zero, with the volume that was
/// active before the fade began.
pub type OnExpireCallback = Box<dyn FnOnce(f64) + Send + Sync + 'static>;

/// Converts a minute count to countdown seconds, rejecting zero and overflow.
pub(crate) fn countdown_seconds(minutes: u64, what: &str) -> Result<u64, PlayerError> {
    if minutes == 0 {
        return Err(PlayerError::InvalidArgument(format!(
            "sleep timer {} must be at least one minute",
            what
        )));
    }
    minutes.checked_mul(60).ok_or_else(|| {
        PlayerError::InvalidArgument(format!("sleep timer {} of {} minutes is too long", what, minutes))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepTimerPhase {
    Idle,
    Running,
    Fading,
}

/// Read-only view of a running timer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepTimerSnapshot {
    pub remaining_seconds: u64,
    pub fade_duration_seconds: u64,
    pub original_volume: f64,
    pub is_fading: bool,
}

struct SleepTimerSession {
    remaining_seconds: u64,
    fade_duration_seconds: u64,
    original_volume: f64,
    is_fading: bool,
    on_expire: Option<OnExpireCallback>,
}

impl SleepTimerSession {
    fn snapshot(&self) -> SleepTimerSnapshot {
        SleepTimerSnapshot {
            remaining_seconds: self.remaining_seconds,
            fade_duration_seconds: self.fade_duration_seconds,
            original_volume: self.original_volume,
            is_fading: self.is_fading,
        }
    }
}

type SharedSession = Arc<TokioMutex<Option<SleepTimerSession>>>;

/// At most one countdown is active at a time.
pub struct SleepTimer {
    engine: Arc<dyn EngineApiContract>,
    volume_rx: watch::Receiver<NowPlaying>,
    event_tx: broadcast::Sender<SessionEvent>,
    fade_duration: StdDuration,
    fade_steps: u32,
    shutdown_timeout: StdDuration,
    session: SharedSession,
    task: TokioMutex<Option<ManagedTask>>,
}

impl SleepTimer {
    pub fn new(
        engine: Arc<dyn EngineApiContract>,
        volume_rx: watch::Receiver<NowPlaying>,
        event_tx: broadcast::Sender<SessionEvent>,
        fade_duration: StdDuration,
        fade_steps: u32,
        shutdown_timeout: StdDuration,
    ) -> Self {
        SleepTimer {
            engine,
            volume_rx,
            event_tx,
            fade_duration,
            fade_steps: fade_steps.max(1),
            shutdown_timeout,
            session: Arc::new(TokioMutex::new(None)),
            task: TokioMutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn phase(&self) -> SleepTimerPhase {
        match self.session.lock().await.as_ref() {
            None => SleepTimerPhase::Idle,
            Some(s) if s.is_fading => SleepTimerPhase::Fading,
            Some(_) => SleepTimerPhase::Running,
        }
    }

    pub async fn snapshot(&self) -> Option<SleepTimerSnapshot> {
        self.session.lock().await.as_ref().map(SleepTimerSession::snapshot)
    }

    /// Starts a countdown of `minutes`, replacing any running one.
    #[instrument(skip(self, on_expire))]
    pub async fn start(&self, minutes: u64, on_expire: OnExpireCallback) -> Result<(), PlayerError> {
        let seconds = countdown_seconds(minutes, "duration")?;
        if self.is_running().await {
            debug!(target: PLAYER_LOG_TARGET, "Replacing running sleep timer.");
            if let Err(e) = self.stop().await {
                warn!(target: PLAYER_LOG_TARGET, "Error while replacing sleep timer: {}", e);
            }
        }

        let original_volume = self.volume_rx.borrow().status.volume;
        *self.session.lock().await = Some(SleepTimerSession {
            remaining_seconds: seconds,
            fade_duration_seconds: self.fade_duration.as_secs(),
            original_volume,
            is_fading: false,
            on_expire: Some(on_expire),
        });

        let countdown = Countdown {
            session: self.session.clone(),
            engine: self.engine.clone(),
            volume_rx: self.volume_rx.clone(),
            event_tx: self.event_tx.clone(),
            fade_steps: self.fade_steps,
        };
        let task = ManagedTask::spawn("sleep-timer", self.shutdown_timeout, move |shutdown_rx| {
            countdown.run(shutdown_rx)
        });
        if let Some(previous) = self.task.lock().await.replace(task) {
            previous.stop().await;
        }
        info!(target: PLAYER_LOG_TARGET, minutes, "Sleep timer started.");
        Ok(())
    }

    /// Cancels the countdown. A fade in progress is undone by restoring the
    /// original volume on the engine.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), PlayerError> {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.stop().await;
        }
        let Some(session) = self.session.lock().await.take() else {
            return Err(PlayerError::SleepTimerNotRunning);
        };
        info!(target: PLAYER_LOG_TARGET, remaining = session.remaining_seconds, "Sleep timer cancelled.");

        if session.is_fading {
            debug!(target: PLAYER_LOG_TARGET, volume = session.original_volume, "Restoring pre-fade volume.");
            self.engine
                .set_volume(session.original_volume)
                .await
                .map_err(|e| PlayerError::remote("set_volume", e))?;
        }
        Ok(())
    }

    /// Adds `minutes` to the remaining time. A fade already in progress keeps
    /// going from its current step.
    #[instrument(skip(self))]
    pub async fn extend(&self, minutes: u64) -> Result<(), PlayerError> {
        let seconds = countdown_seconds(minutes, "extension")?;
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(PlayerError::SleepTimerNotRunning)?;
        session.remaining_seconds = session
            .remaining_seconds
            .checked_add(seconds)
            .ok_or_else(|| PlayerError::InvalidArgument(format!("sleep timer extension of {} minutes is too long", minutes)))?;
        info!(target: PLAYER_LOG_TARGET, remaining = session.remaining_seconds, "Sleep timer extended.");
        Ok(())
    }

    /// Replaces the volume restored at the end of a fade.
    ///
    /// Returns false when no fade is in progress, in which case the caller
    /// applies the volume itself.
    pub async fn rebase_if_fading(&self, volume: f64) -> bool {
        match self.session.lock().await.as_mut() {
            Some(session) if session.is_fading => {
                debug!(target: PLAYER_LOG_TARGET, volume, "Volume changed during fade; updating restore target.");
                session.original_volume = volume;
                true
            }
            _ => false,
        }
    }
}

struct FadeRamp {
    ticker: Interval,
    step: u32,
}

async fn next_fade_step(fade: &mut Option<FadeRamp>) -> u32 {
    match fade {
        Some(ramp) => {
            ramp.ticker.tick().await;
            ramp.step += 1;
            ramp.step
        }
        None => std::future::pending().await,
    }
}

struct Countdown {
    session: SharedSession,
    engine: Arc<dyn EngineApiContract>,
    volume_rx: watch::Receiver<NowPlaying>,
    event_tx: broadcast::Sender<SessionEvent>,
    fade_steps: u32,
}

impl Countdown {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let second = StdDuration::from_secs(1);
        let mut seconds = interval_at(Instant::now() + second, second);
        seconds.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fade: Option<FadeRamp> = None;
        let mut last_step_applied = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    debug!(target: PLAYER_LOG_TARGET, "Sleep timer countdown received shutdown signal.");
                    break;
                }
                _ = seconds.tick() => {
                    let mut guard = self.session.lock().await;
                    let Some(session) = guard.as_mut() else { break };
                    session.remaining_seconds = session.remaining_seconds.saturating_sub(1);

                    if session.remaining_seconds == 0 {
                        let expired = guard.take();
                        drop(guard);
                        if let Some(expired) = expired {
                            self.expire(expired, last_step_applied).await;
                        }
                        break;
                    }

                    if !session.is_fading && session.remaining_seconds <= session.fade_duration_seconds {
                        session.is_fading = true;
                        session.original_volume = self.volume_rx.borrow().status.volume;
                        let span = session.remaining_seconds.min(session.fade_duration_seconds);
                        let period = StdDuration::from_secs_f64(span as f64 / self.fade_steps as f64);
                        let mut ticker = interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        fade = Some(FadeRamp { ticker, step: 0 });

                        let original_volume = session.original_volume;
                        info!(target: PLAYER_LOG_TARGET, original_volume, span, "Sleep timer fade started.");
                        if self.event_tx.send(SessionEvent::SleepTimerFadeStarted { original_volume }).is_err() {
                            debug!(target: PLAYER_LOG_TARGET, "No listeners for fade start.");
                        }
                    }
                }
                step = next_fade_step(&mut fade) => {
                    let original = match self.session.lock().await.as_ref() {
                        Some(session) => session.original_volume,
                        None => break,
                    };
                    let volume = original * (1.0 - step as f64 / self.fade_steps as f64);
                    self.apply_volume(volume.max(0.0)).await;
                    last_step_applied = step;
                    if step >= self.fade_steps {
                        fade = None;
                    }
                }
            }
        }
    }

    async fn apply_volume(&self, volume: f64) {
        if let Err(e) = self.engine.set_volume(volume).await {
            warn!(target: PLAYER_LOG_TARGET, volume, "Fade step failed: {}", e);
        }
    }

    async fn expire(&self, mut expired: SleepTimerSession, last_step_applied: u32) {
        if last_step_applied < self.fade_steps {
            self.apply_volume(0.0).await;
        }
        info!(target: PLAYER_LOG_TARGET, original_volume = expired.original_volume, "Sleep timer expired.");
        if let Some(on_expire) = expired.on_expire.take() {
            on_expire(expired.original_volume);
        }
    }
}
