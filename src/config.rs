//! Application configuration, read once from the environment.
//!
//! * `GEMINI_API_KEY` (or `API_KEY`): key for the hosted model. Only the voice
//!   and chat commands need it.
//! * `LIVE_MODEL`, `CHAT_MODEL`, `VOICE_NAME`: optional overrides.
//! * `CLOUDS_THEME_FILE`: where the theme preference is kept. Defaults to the
//!   user config directory.
//! * `RUST_LOG`: log filter, `info` when unset.

use crate::chat::gemini::DEFAULT_MODEL as DEFAULT_CHAT_MODEL;
use crate::consumers::theme::FileStore;
use crate::live::LiveConfig;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::path::PathBuf;

pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidVar { name: String, reason: String },
}

pub struct Config {
    api_key: Option<SecretString>,
    pub live_model: Option<String>,
    pub chat_model: String,
    pub voice_name: Option<String>,
    pub theme_file: Option<PathBuf>,
    pub log_filter: String,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|name| var(name))
            .map(SecretString::from);

        let theme_file = var("CLOUDS_THEME_FILE").map(PathBuf::from);
        if let Some(path) = &theme_file {
            if path.is_dir() {
                return Err(ConfigError::InvalidVar {
                    name: "CLOUDS_THEME_FILE".to_string(),
                    reason: format!("{} is a directory", path.display()),
                });
            }
        }

        Ok(Self {
            api_key,
            live_model: var("LIVE_MODEL"),
            chat_model: var("CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            voice_name: var("VOICE_NAME"),
            theme_file,
            log_filter: var("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }

    pub fn api_key(&self) -> Result<&SecretString, ConfigError> {
        self.api_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingVar(API_KEY_VARS.join(" or ")))
    }

    /// Websocket settings for the voice agent.
    pub fn live_config(&self) -> Result<LiveConfig, ConfigError> {
        let mut builder = LiveConfig::builder().with_api_key(self.api_key()?.expose_secret());
        if let Some(model) = &self.live_model {
            builder = builder.with_model(model);
        }
        if let Some(voice) = &self.voice_name {
            builder = builder.with_voice(voice);
        }
        Ok(builder.build())
    }

    /// The configured theme file, else the per-user default.
    pub fn theme_path(&self) -> Option<PathBuf> {
        self.theme_file.clone().or_else(FileStore::default_path)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("live_model", &self.live_model)
            .field("chat_model", &self.chat_model)
            .field("voice_name", &self.voice_name)
            .field("theme_file", &self.theme_file)
            .field("log_filter", &self.log_filter)
            .finish()
    }
}
