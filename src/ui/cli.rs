//! Command-line interface implementation

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::models::PlaybackState;
use crate::player::{NowPlaying, PlaybackSession, PlayerError, SessionEvent, SleepTimerSnapshot, MAX_SPEED, MIN_SPEED};

const LOG_TARGET: &str = "r_bookcli::ui::cli";

pub const SEEK_STEP_SECONDS: f64 = 30.0;
pub const VOLUME_STEP: f64 = 0.1;
pub const SPEED_STEP: f64 = 0.25;
pub const SLEEP_TIMER_MINUTES: u64 = 15;

/// Command-line arguments for r-bookcli
#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal remote for an audiobook playback engine", long_about = None)]
pub struct Args {
    /// Playback engine base URL
    #[arg(short, long, env = "R_BOOKCLI_ENGINE_URL")]
    pub engine_url: Option<String>,

    /// Engine API key
    #[arg(short, long, env = "R_BOOKCLI_API_KEY")]
    pub api_key: Option<String>,

    /// Config file path
    #[arg(short, long, env = "R_BOOKCLI_CONFIG")]
    pub config: Option<String>,

    /// Library id of the audiobook to play
    #[arg(long)]
    pub book_id: String,

    /// Engine-side path of the audiobook file
    #[arg(long)]
    pub book_path: String,

    #[arg(long)]
    pub book_title: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    pub log_json: bool,
}

/// What a key press asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserIntent {
    TogglePlayPause,
    Stop,
    SeekBy(f64),
    NextChapter,
    PreviousChapter,
    VolumeBy(f64),
    SpeedBy(f64),
    StartSleepTimer(u64),
    CancelSleepTimer,
    ExtendSleepTimer(u64),
    Quit,
}

/// Maps a key press to an intent. Key releases and unbound keys yield `None`.
pub fn intent_for_key(key: &KeyEvent) -> Option<UserIntent> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c')).then_some(UserIntent::Quit);
    }
    let intent = match key.code {
        KeyCode::Char(' ') => UserIntent::TogglePlayPause,
        KeyCode::Char('s') => UserIntent::Stop,
        KeyCode::Left => UserIntent::SeekBy(-SEEK_STEP_SECONDS),
        KeyCode::Right => UserIntent::SeekBy(SEEK_STEP_SECONDS),
        KeyCode::Char('n') => UserIntent::NextChapter,
        KeyCode::Char('p') => UserIntent::PreviousChapter,
        KeyCode::Char('+') | KeyCode::Char('=') => UserIntent::VolumeBy(VOLUME_STEP),
        KeyCode::Char('-') => UserIntent::VolumeBy(-VOLUME_STEP),
        KeyCode::Char(']') => UserIntent::SpeedBy(SPEED_STEP),
        KeyCode::Char('[') => UserIntent::SpeedBy(-SPEED_STEP),
        KeyCode::Char('t') => UserIntent::StartSleepTimer(SLEEP_TIMER_MINUTES),
        KeyCode::Char('T') => UserIntent::CancelSleepTimer,
        KeyCode::Char('e') => UserIntent::ExtendSleepTimer(SLEEP_TIMER_MINUTES),
        KeyCode::Char('q') | KeyCode::Esc => UserIntent::Quit,
        _ => return None,
    };
    Some(intent)
}

/// Executes an intent against the session. `Quit` is handled by the caller.
pub async fn dispatch_intent(session: &Arc<PlaybackSession>, intent: UserIntent) -> Result<(), PlayerError> {
    debug!(target: LOG_TARGET, ?intent, "Dispatching user intent.");
    match intent {
        UserIntent::TogglePlayPause => session.toggle_play_pause().await,
        UserIntent::Stop => session.stop().await,
        UserIntent::SeekBy(offset) => session.seek_by(offset).await,
        UserIntent::NextChapter => session.skip_to_next_chapter().await,
        UserIntent::PreviousChapter => session.skip_to_previous_chapter().await,
        UserIntent::VolumeBy(delta) => {
            // While fading, steps apply to the volume that will be restored.
            let base = match session.sleep_timer().snapshot().await {
                Some(snapshot) if snapshot.is_fading => snapshot.original_volume,
                _ => session.now_playing().status.volume,
            };
            session.update_volume((base + delta).clamp(0.0, 1.0)).await
        }
        UserIntent::SpeedBy(delta) => {
            let speed = session.now_playing().status.speed + delta;
            session.update_speed(speed.clamp(MIN_SPEED, MAX_SPEED)).await
        }
        UserIntent::StartSleepTimer(minutes) => session.start_sleep_timer(minutes).await,
        UserIntent::CancelSleepTimer => session.stop_sleep_timer().await,
        UserIntent::ExtendSleepTimer(minutes) => session.extend_sleep_timer(minutes).await,
        UserIntent::Quit => Ok(()),
    }
}

/// Formats seconds as `m:ss`, or `h:mm:ss` from one hour on.
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 { seconds as u64 } else { 0 };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// One-line summary of the published state.
pub fn status_line(now_playing: &NowPlaying, sleep: Option<SleepTimerSnapshot>) -> String {
    let status = &now_playing.status;
    let icon = match status.state {
        PlaybackState::Playing => ">",
        PlaybackState::Paused => "||",
        PlaybackState::Stopped => "[]",
    };
    let chapter = now_playing
        .current_chapter()
        .map(|c| format!("Ch {} {}", c.chapter_number, c.title))
        .unwrap_or_else(|| "-".to_string());
    let duration = status.duration.map(format_time).unwrap_or_else(|| "--:--".to_string());

    let mut line = format!(
        "{} {} | {} / {} | vol {:.0}% | {:.2}x",
        icon,
        chapter,
        format_time(status.position),
        duration,
        status.volume * 100.0,
        status.speed
    );
    if now_playing.loading {
        line.push_str(" | loading");
    }
    if let Some(sleep) = sleep {
        let marker = if sleep.is_fading { "fading" } else { "sleep" };
        line.push_str(&format!(" | {} {}", marker, format_time(sleep.remaining_seconds as f64)));
    }
    line
}

/// Puts the terminal in raw mode and restores it when dropped.
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn new() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(TerminalGuard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(target: LOG_TARGET, "Failed to restore terminal: {}", e);
        }
    }
}

/// Reads key presses on a blocking thread until the receiver is dropped.
pub fn spawn_key_reader() -> mpsc::Receiver<KeyEvent> {
    let (tx, rx) = mpsc::channel(32);
    tokio::task::spawn_blocking(move || loop {
        if tx.is_closed() {
            break;
        }
        match event::poll(StdDuration::from_millis(100)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => {
                    if tx.blocking_send(key).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: LOG_TARGET, "Failed to read terminal event: {}", e);
                    break;
                }
            },
            Ok(false) => {}
            Err(e) => {
                warn!(target: LOG_TARGET, "Failed to poll terminal events: {}", e);
                break;
            }
        }
    });
    rx
}

/// CLI user interface for interacting with the application
pub struct Cli {
    pub args: Args,
    progress: ProgressBar,
}

impl Cli {
    /// Create a new CLI instance
    pub fn new() -> Self {
        Self::with_args(Args::parse())
    }

    pub fn with_args(args: Args) -> Self {
        Cli {
            args,
            progress: create_progress_bar(),
        }
    }

    pub fn print_help_line(&self) {
        self.progress.println(
            "space play/pause  s stop  <-/-> seek 30s  n/p chapter  +/- volume  [/] speed  t/T/e sleep  q quit",
        );
    }

    /// Redraws the progress bar from the published state.
    pub fn render(&self, now_playing: &NowPlaying, sleep: Option<SleepTimerSnapshot>) {
        let length = now_playing.status.duration.unwrap_or(0.0).max(0.0) as u64;
        self.progress.set_length(length.max(1));
        self.progress.set_position(now_playing.status.position.max(0.0) as u64);
        self.progress.set_message(status_line(now_playing, sleep));
    }

    pub fn display_event(&self, event: &SessionEvent) {
        let message = match event {
            SessionEvent::Loaded { audiobook_id, chapter_count } => {
                format!("Loaded {} ({} chapters)", audiobook_id, chapter_count)
            }
            SessionEvent::ChapterChanged { chapter_number, .. } => format!("Chapter {}", chapter_number),
            SessionEvent::SleepTimerFadeStarted { .. } => "Sleep timer: fading out".to_string(),
            SessionEvent::SleepTimerExpired => "Sleep timer: expired".to_string(),
            SessionEvent::Error(message) => format!("Error: {}", message),
        };
        self.progress.println(message);
    }

    /// Display error messages
    pub fn display_error(&self, error: &dyn Error) {
        self.progress.println(format!("Error: {}", error));
    }

    pub fn finish(&self) {
        self.progress.abandon();
    }
}

fn create_progress_bar() -> ProgressBar {
    let style = ProgressStyle::with_template("{msg}\n[{bar:50.cyan/blue}]")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    let bar = ProgressBar::new(1);
    bar.set_style(style);
    bar
}
