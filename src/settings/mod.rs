//! Configuration and persisted settings

pub mod config;
pub mod store;

pub use config::{AppConfig, DeliveryMode, APP_DIR_NAME};
pub use store::{SettingsError, SettingsStore, WATERMARK_IMAGE_KEY, WATERMARK_SETTINGS_KEY};
