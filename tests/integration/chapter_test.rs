//! Integration tests for chapter tracking and navigation

use crate::test_utils::*;
use r_bookcli::engine::PlaybackState;
use r_bookcli::player::{PlaybackSession, PlayerError, SessionConfig, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod chapter_integration_tests {
    use super::*;

    async fn loaded_session(engine: Arc<MockEngine>, config: SessionConfig) -> Arc<PlaybackSession> {
        let session = PlaybackSession::new(engine, config);
        session.load_audio(sample_audiobook()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        session
    }

    fn chapter_changes(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChapterChanged { chapter_id, .. } => Some(chapter_id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_selects_first_chapter() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = PlaybackSession::new(engine.clone(), test_config());
        let mut events = session.subscribe_events();

        session.load_audio(sample_audiobook()).await.unwrap();

        let np = session.now_playing();
        assert_eq!(np.chapters.len(), 3);
        assert_eq!(np.current_chapter_id.as_deref(), Some("ch-1"));
        assert_eq!(np.current_chapter().map(|c| c.title.as_str()), Some("Part 1"));
        assert!(drain_events(&mut events).contains(&SessionEvent::Loaded {
            audiobook_id: BOOK_ID.to_string(),
            chapter_count: 3,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_chapters_yield_empty_list() {
        let engine = MockEngine::new();
        let session = loaded_session(engine.clone(), test_config()).await;

        let np = session.now_playing();
        assert!(np.chapters.is_empty());
        assert!(np.current_chapter_id.is_none());

        session.skip_to_next_chapter().await.unwrap();
        assert_eq!(engine.count(|c| matches!(c, EngineCall::PlayChapter(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloading_same_book_reuses_chapters() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), test_config()).await;
        session.load_audio(sample_audiobook()).await.unwrap();

        assert_eq!(engine.count(|c| matches!(c, EngineCall::GetChapters(_))), 1);
        assert_eq!(engine.count(|c| matches!(c, EngineCall::Load(_))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_resolves_chapter_from_foreign_path() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), test_config()).await;
        let mut events = session.subscribe_events();

        engine.update_status(|status| {
            status.current_file = Some("C:\\Library\\Dune\\CH02.mp3".to_string());
        });
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));
        assert_eq!(chapter_changes(&drain_events(&mut events)), vec!["ch-2".to_string()]);

        // Same file again does not emit another change.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(chapter_changes(&drain_events(&mut events)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_file_falls_back_to_first_chapter() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), test_config()).await;
        engine.update_status(|status| status.current_file = Some("/library/dune/ch03.mp3".to_string()));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-3"));

        engine.update_status(|status| status.current_file = Some("/elsewhere/intro.m4b".to_string()));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_next_switches_chapter() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), quiet_poll_config()).await;
        let mut events = session.subscribe_events();

        session.skip_to_next_chapter().await.unwrap();

        assert_eq!(engine.count(|c| *c == EngineCall::PlayChapter("ch-2".to_string())), 1);
        let np = session.now_playing();
        assert_eq!(np.current_chapter_id.as_deref(), Some("ch-2"));
        assert_eq!(np.status.position, 0.0);
        assert_eq!(np.status.state, PlaybackState::Playing);
        assert_eq!(chapter_changes(&drain_events(&mut events)), vec!["ch-2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_report_ignored_while_settling() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), quiet_poll_config()).await;
        session.skip_to_next_chapter().await.unwrap();
        let polls = engine.status_polls();

        // Engine still reports the previous file right after the switch.
        engine.update_status(|status| status.current_file = Some("/library/dune/ch01.mp3".to_string()));
        session.refresh_status().await.unwrap();
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));

        engine.update_status(|status| status.current_file = Some("/library/dune/ch02.mp3".to_string()));
        tokio::time::sleep(Duration::from_millis(400)).await;

        // The follow-up poll ran once the settle window had passed.
        assert_eq!(engine.status_polls(), polls + 2);
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_chapter_switch_keeps_pointer() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), test_config()).await;
        let mut events = session.subscribe_events();
        // Slower than both the settle delay and the poll interval.
        engine.set_command_delay(Duration::from_millis(800));
        let polls = engine.status_polls();

        session.skip_to_next_chapter().await.unwrap();

        assert!(engine.status_polls() > polls, "a poll should have run during the switch");
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));
        assert_eq!(chapter_changes(&drain_events(&mut events)), vec!["ch-2".to_string()]);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));
        assert!(chapter_changes(&drain_events(&mut events)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_at_boundaries_is_noop() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), test_config()).await;

        session.skip_to_previous_chapter().await.unwrap();
        assert_eq!(engine.count(|c| matches!(c, EngineCall::PlayChapter(_))), 0);

        session.skip_to_next_chapter().await.unwrap();
        session.skip_to_next_chapter().await.unwrap();
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-3"));
        assert_eq!(engine.count(|c| matches!(c, EngineCall::PlayChapter(_))), 2);

        session.skip_to_next_chapter().await.unwrap();
        assert_eq!(engine.count(|c| matches!(c, EngineCall::PlayChapter(_))), 2);
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-3"));

        session.skip_to_previous_chapter().await.unwrap();
        assert_eq!(session.now_playing().current_chapter_id.as_deref(), Some("ch-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_switch_rolls_back() {
        let engine = MockEngine::new().with_chapters(BOOK_ID, sample_chapters());
        let session = loaded_session(engine.clone(), quiet_poll_config()).await;
        session.seek(42.0).await.unwrap();
        engine.fail("play_chapter");

        let err = session.skip_to_next_chapter().await.unwrap_err();
        assert!(matches!(err, PlayerError::RemoteCallFailed { command: "play_chapter", .. }));
        let np = session.now_playing();
        assert_eq!(np.current_chapter_id.as_deref(), Some("ch-1"));
        assert_eq!(np.status.position, 42.0);
    }
}
