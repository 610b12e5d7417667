use crate::engine::EngineError;
use thiserror::Error;

/// Errors surfaced by [`PlaybackSession`](super::PlaybackSession) commands.
///
/// The `Display` output is the human-readable rejection reason shown to the user.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlayerError {
    #[error("No audiobook loaded")]
    NoAudiobookLoaded,
    #[error("Engine command '{command}' failed: {reason}")]
    RemoteCallFailed {
        command: &'static str,
        reason: String,
    },
    /// A status poll failed. Logged by the poll loop, never shown to the user.
    #[error("Playback status unavailable: {0}")]
    StatusUnavailable(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No sleep timer is running")]
    SleepTimerNotRunning,
}

impl PlayerError {
    pub(crate) fn remote(command: &'static str, err: EngineError) -> Self {
        PlayerError::RemoteCallFailed {
            command,
            reason: err.to_string(),
        }
    }
}
