use super::PLAYER_LOG_TARGET;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Transport operations that are single-flighted independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Load,
    Play,
    Pause,
    Stop,
}

/// One in-progress flag per [`CommandKind`].
///
/// A second request of a kind that is already in flight is dropped, not
/// queued. Different kinds never block each other.
#[derive(Debug, Default)]
pub struct CommandGate {
    load_in_progress: AtomicBool,
    play_in_progress: AtomicBool,
    pause_in_progress: AtomicBool,
    stop_in_progress: AtomicBool,
}

/// Releases its flag when dropped, including on panic or cancellation.
#[derive(Debug)]
pub struct GateGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl CommandGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, kind: CommandKind) -> &AtomicBool {
        match kind {
            CommandKind::Load => &self.load_in_progress,
            CommandKind::Play => &self.play_in_progress,
            CommandKind::Pause => &self.pause_in_progress,
            CommandKind::Stop => &self.stop_in_progress,
        }
    }

    pub fn is_in_progress(&self, kind: CommandKind) -> bool {
        self.flag(kind).load(Ordering::Acquire)
    }

    /// Claims the slot for `kind`, or returns `None` if it is taken.
    pub fn try_acquire(&self, kind: CommandKind) -> Option<GateGuard<'_>> {
        let flag = self.flag(kind);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { flag })
    }

    /// Runs `f` if no call of the same kind is in flight.
    ///
    /// Returns `None` without invoking `f` when the slot is taken.
    pub async fn guarded<F, Fut, T>(&self, kind: CommandKind, f: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = match self.try_acquire(kind) {
            Some(guard) => guard,
            None => {
                debug!(target: PLAYER_LOG_TARGET, ?kind, "Command already in progress; dropping duplicate request.");
                return None;
            }
        };
        Some(f().await)
    }
}
