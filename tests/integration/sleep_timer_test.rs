//! Integration tests for the sleep timer countdown and volume fade

use crate::test_utils::*;
use r_bookcli::engine::PlaybackState;
use r_bookcli::player::{PlaybackSession, PlayerError, SessionEvent, SleepTimerPhase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[cfg(test)]
mod sleep_timer_integration_tests {
    use super::*;

    /// Session at volume 0.8 with the default 30 s / 30 step fade.
    async fn session_at_volume(engine: Arc<MockEngine>) -> Arc<PlaybackSession> {
        engine.update_status(|status| status.volume = 0.8);
        let session = PlaybackSession::new(engine, test_config());
        session.load_audio(sample_audiobook()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(session.now_playing().status.volume, 0.8);
        session
    }

    struct ExpiryProbe {
        calls: Arc<AtomicUsize>,
        volume: Arc<Mutex<Option<f64>>>,
    }

    impl ExpiryProbe {
        fn new() -> Self {
            ExpiryProbe {
                calls: Arc::new(AtomicUsize::new(0)),
                volume: Arc::new(Mutex::new(None)),
            }
        }

        fn callback(&self) -> r_bookcli::player::OnExpireCallback {
            let calls = self.calls.clone();
            let volume = self.volume.clone();
            Box::new(move |original| {
                calls.fetch_add(1, Ordering::SeqCst);
                *volume.lock().unwrap() = Some(original);
            })
        }

        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_fades_then_expires() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let mut events = session.subscribe_events();
        let probe = ExpiryProbe::new();

        session.sleep_timer().start(1, probe.callback()).await.unwrap();
        assert_eq!(session.sleep_timer().phase().await, SleepTimerPhase::Running);

        tokio::time::sleep(Duration::from_millis(29_500)).await;
        assert_eq!(session.sleep_timer().phase().await, SleepTimerPhase::Running);
        assert!(engine.volume_writes().is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.sleep_timer().phase().await, SleepTimerPhase::Fading);
        let snapshot = session.sleep_timer().snapshot().await.unwrap();
        assert_eq!(snapshot.original_volume, 0.8);
        assert_eq!(snapshot.remaining_seconds, 30);
        assert!(drain_events(&mut events).contains(&SessionEvent::SleepTimerFadeStarted { original_volume: 0.8 }));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(probe.count(), 1);
        assert_eq!(*probe.volume.lock().unwrap(), Some(0.8));
        assert_eq!(session.sleep_timer().phase().await, SleepTimerPhase::Idle);

        let writes = engine.volume_writes();
        assert_eq!(writes.last().copied(), Some(0.0));
        assert!(writes.windows(2).all(|w| w[1] <= w[0]), "fade not monotonic: {:?}", writes);
        assert!(writes.len() >= 29);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_fade_restores_volume() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let probe = ExpiryProbe::new();

        session.sleep_timer().start(1, probe.callback()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40_500)).await;
        assert!(engine.status().volume < 0.8);

        session.stop_sleep_timer().await.unwrap();
        assert_eq!(engine.volume_writes().last().copied(), Some(0.8));
        assert_eq!(engine.status().volume, 0.8);
        assert_eq!(session.sleep_timer().phase().await, SleepTimerPhase::Idle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fade_leaves_volume_alone() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let probe = ExpiryProbe::new();

        session.sleep_timer().start(1, probe.callback()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        session.stop_sleep_timer().await.unwrap();

        assert!(engine.volume_writes().is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_while_fading_keeps_fading() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let probe = ExpiryProbe::new();

        session.sleep_timer().start(1, probe.callback()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(35_500)).await;
        session.extend_sleep_timer(1).await.unwrap();

        let snapshot = session.sleep_timer().snapshot().await.unwrap();
        assert!(snapshot.is_fading);
        assert_eq!(snapshot.remaining_seconds, 85);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.count(), 0);
        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(probe.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_change_during_fade_rebases_restore_target() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let probe = ExpiryProbe::new();

        session.sleep_timer().start(1, probe.callback()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30_500)).await;

        session.update_volume(0.5).await.unwrap();
        assert!(!engine.volume_writes().contains(&0.5));
        assert_eq!(session.sleep_timer().snapshot().await.unwrap().original_volume, 0.5);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.status().volume < 0.5);

        session.stop_sleep_timer().await.unwrap();
        assert_eq!(engine.status().volume, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_argument_and_state_errors() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;

        assert_eq!(session.stop_sleep_timer().await, Err(PlayerError::SleepTimerNotRunning));
        assert_eq!(session.extend_sleep_timer(5).await, Err(PlayerError::SleepTimerNotRunning));
        assert!(matches!(
            session.start_sleep_timer(0).await,
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.start_sleep_timer(u64::MAX / 10).await,
            Err(PlayerError::InvalidArgument(_))
        ));
        assert!(!session.sleep_timer().is_running().await);

        session.start_sleep_timer(1).await.unwrap();
        assert!(matches!(
            session.extend_sleep_timer(u64::MAX / 60).await,
            Err(PlayerError::InvalidArgument(_))
        ));
        assert_eq!(session.sleep_timer().snapshot().await.unwrap().remaining_seconds, 60);
        session.stop_sleep_timer().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_running_timer() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let first = ExpiryProbe::new();
        let second = ExpiryProbe::new();

        session.sleep_timer().start(1, first.callback()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        session.sleep_timer().start(2, second.callback()).await.unwrap();
        assert_eq!(session.sleep_timer().snapshot().await.unwrap().remaining_seconds, 120);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(first.count(), 0);
        assert_eq!(second.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expiry_pauses_and_restores_volume() {
        let engine = MockEngine::new();
        let session = session_at_volume(engine.clone()).await;
        let mut events = session.subscribe_events();
        session.play().await.unwrap();

        session.start_sleep_timer(1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(62)).await;

        assert!(drain_events(&mut events).contains(&SessionEvent::SleepTimerExpired));
        assert_eq!(engine.count(|c| *c == EngineCall::Pause), 1);
        let status = engine.status();
        assert_eq!(status.state, PlaybackState::Paused);
        assert_eq!(status.volume, 0.8);
        assert_eq!(session.now_playing().status.state, PlaybackState::Paused);
    }
}
