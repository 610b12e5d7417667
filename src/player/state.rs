use crate::engine::models::{Chapter, PlaybackStatus};
use std::sync::Arc;
use tokio::time::Instant;

/// The locally displayed "now playing" value published to the front-end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NowPlaying {
    /// Last authoritative status, possibly overlaid with optimistic or
    /// interpolated values until the next poll.
    pub status: PlaybackStatus,
    pub audiobook_id: Option<String>,
    pub current_chapter_id: Option<String>,
    /// Ordered by `chapter_number`.
    pub chapters: Arc<Vec<Chapter>>,
    /// True while a load is in flight.
    pub loading: bool,
}

impl NowPlaying {
    pub fn current_chapter(&self) -> Option<&Chapter> {
        let id = self.current_chapter_id.as_ref()?;
        self.chapters.iter().find(|c| &c.id == id)
    }

    pub(crate) fn current_chapter_index(&self) -> Option<usize> {
        let id = self.current_chapter_id.as_ref()?;
        self.chapters.iter().position(|c| &c.id == id)
    }
}

/// Discrete notifications broadcast by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Loaded {
        audiobook_id: String,
        chapter_count: usize,
    },
    ChapterChanged {
        chapter_id: String,
        chapter_number: u32,
    },
    SleepTimerFadeStarted {
        original_volume: f64,
    },
    SleepTimerExpired,
    Error(String),
}

/// Last authoritative position sample and the instant it was taken.
///
/// Polls, seeks, loads and chapter switches move the anchor (a rejected seek
/// puts the previous one back); the interpolation loop only reads it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationAnchor {
    pub server_position: f64,
    pub server_timestamp: Instant,
}

impl InterpolationAnchor {
    pub fn new(server_position: f64, server_timestamp: Instant) -> Self {
        Self {
            server_position,
            server_timestamp,
        }
    }

    /// Extrapolated position at `now`, clamped to `[0, duration]`.
    pub fn interpolate(&self, now: Instant, speed: f64, duration: Option<f64>) -> f64 {
        let elapsed = now.saturating_duration_since(self.server_timestamp).as_secs_f64();
        let position = self.server_position + elapsed * speed;
        let upper = duration.unwrap_or(f64::INFINITY);
        position.max(0.0).min(upper)
    }
}
