use r_bookcli::config::{LogFormat, Settings};
use r_bookcli::engine::{Audiobook, EngineClient};
use r_bookcli::player::PlaybackSession;
use r_bookcli::ui::{dispatch_intent, intent_for_key, spawn_key_reader, Cli, TerminalGuard, UserIntent};
use r_bookcli::{init_app_dirs, init_logging};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse command-line arguments and initialize CLI
    let cli = Cli::new();
    let args = &cli.args;

    init_app_dirs()?;

    let config_path = args
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&config_path)?;

    // Command line and environment (resolved by clap) win over the file.
    if let Some(engine_url) = &args.engine_url {
        settings.engine_url = engine_url.clone();
    }
    if args.api_key.is_some() {
        settings.api_key = args.api_key.clone();
    }
    if args.log_json {
        settings.log_format = LogFormat::Json;
    }
    settings.validate()?;

    init_logging(settings.log_format);
    info!(engine_url = %settings.engine_url, config = %config_path.display(), "Starting r-bookcli.");

    let mut client = EngineClient::new(&settings.engine_url, settings.request_timeout());
    if let Some(api_key) = &settings.api_key {
        client = client.with_api_key(api_key);
    }
    let session = PlaybackSession::new(Arc::new(client), settings.session_config());

    let audiobook = Audiobook {
        id: args.book_id.clone(),
        title: args.book_title.clone(),
        file_path: args.book_path.clone(),
    };
    session.load_audio(audiobook).await?;
    if let Err(e) = session.update_volume(settings.default_volume).await {
        warn!("Could not apply default volume: {}", e);
    }

    let terminal = TerminalGuard::new()?;
    cli.print_help_line();

    let mut keys = spawn_key_reader();
    let mut now_playing_rx = session.subscribe();
    let mut events = session.subscribe_events();
    let mut redraw = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            key = keys.recv() => {
                let Some(key) = key else { break };
                let Some(intent) = intent_for_key(&key) else { continue };
                if intent == UserIntent::Quit {
                    break;
                }
                if let Err(e) = dispatch_intent(&session, intent).await {
                    cli.display_error(&e);
                }
            }
            changed = now_playing_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let now_playing = now_playing_rx.borrow_and_update().clone();
                cli.render(&now_playing, session.sleep_timer().snapshot().await);
            }
            event = events.recv() => match event {
                Ok(event) => cli.display_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} session events.", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = redraw.tick() => {
                cli.render(&session.now_playing(), session.sleep_timer().snapshot().await);
            }
        }
    }

    info!("Quitting.");
    drop(keys);
    session.shutdown().await;
    cli.finish();
    drop(terminal);
    Ok(())
}
