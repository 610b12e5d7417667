//! Data models exchanged with the playback engine

use serde::{Deserialize, Serialize};

/// Transport state as reported by the engine.
///
/// There is no `Loading` variant: an in-flight load is tracked by
/// the session's command gate, not by the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "Stopped"),
            PlaybackState::Playing => write!(f, "Playing"),
            PlaybackState::Paused => write!(f, "Paused"),
        }
    }
}

/// Authoritative playback snapshot returned by `GET /playback/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Position in seconds.
    #[serde(default)]
    pub position: f64,
    /// Duration in seconds, if the engine knows it.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default = "default_speed")]
    pub speed: f64,
    /// Engine-side identifier (path) of the loaded media.
    #[serde(default)]
    pub current_file: Option<String>,
}

fn default_volume() -> f64 {
    1.0
}

fn default_speed() -> f64 {
    1.0
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            position: 0.0,
            duration: None,
            volume: default_volume(),
            speed: default_speed(),
            current_file: None,
        }
    }
}

impl PlaybackStatus {
    /// Returns a copy with `position` forced into `[0, duration]`.
    pub fn sanitized(mut self) -> Self {
        if !self.position.is_finite() || self.position < 0.0 {
            self.position = 0.0;
        }
        if let Some(duration) = self.duration {
            if duration.is_finite() && duration >= 0.0 {
                self.position = self.position.min(duration);
            } else {
                self.duration = None;
            }
        }
        self
    }
}

/// A logical chapter of an audiobook, backed by one file on the engine side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: String,
    pub audiobook_id: String,
    /// 1-based, unique within the audiobook.
    pub chapter_number: u32,
    pub title: String,
    pub file_path: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// The minimal library record needed to start playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audiobook {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub file_path: String,
}

// --- Request bodies ---

#[derive(Serialize, Debug, Clone)]
pub struct LoadRequest<'a> {
    pub file_path: &'a str,
}

#[derive(Serialize, Debug, Clone)]
pub struct SeekRequest {
    pub position: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct VolumeRequest {
    pub volume: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct SpeedRequest {
    pub speed: f64,
}
