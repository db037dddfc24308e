//! Screen recorder host
//!
//! Captures the screen, optionally watermarks the recording, converts it to
//! the requested format and delivers it. The browser extension drives the
//! host over native messaging on stdin/stdout.

pub mod capture;
pub mod commands;
pub mod convert;
pub mod delivery;
pub mod recorder;
pub mod session;
pub mod settings;
pub mod utils;
pub mod watermark;

use capture::ScreenCaptureSource;
use recorder::FfmpegEncoderBackend;
use session::SessionController;
use settings::{AppConfig, SettingsStore, APP_DIR_NAME};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::AppResult;

/// Where watermark settings persist between runs
fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
        .join("settings.json")
}

/// Run the native-messaging host until the extension disconnects
pub async fn run() -> AppResult<()> {
    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_recorder_lib=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting screen recorder host v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    tracing::debug!("Config: {:?}", config);

    let settings = Arc::new(SettingsStore::open(settings_path())?);
    let capture = Arc::new(ScreenCaptureSource::new(config.frame_rate));
    let encoder = Arc::new(FfmpegEncoderBackend::new(
        &config.ffmpeg_path,
        config.video_bits_per_second,
    ));
    let controller = SessionController::new(config, capture, encoder, settings);

    commands::run_host(controller, tokio::io::stdin(), tokio::io::stdout()).await
}
