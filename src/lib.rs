//! r-bookcli library core functionality

pub mod config;
pub mod engine;
pub mod player;
pub mod ui;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the application directories
pub fn init_app_dirs() -> std::io::Result<()> {
    let default_path = config::Settings::default_path();
    if let Some(config_dir) = default_path.parent() {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)?;
        }
    }
    Ok(())
}

/// Installs the global tracing subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the default `r_bookcli=info` filter. Calling this
/// twice is harmless; the second call is ignored.
pub fn init_logging(format: config::LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("r_bookcli=info"));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        config::LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        config::LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    if let Err(e) = result {
        eprintln!("Logging already initialized: {}", e);
    }
}
