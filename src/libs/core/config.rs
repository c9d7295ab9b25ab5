use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::libs::assistant::gemini::GeminiSettings;
use crate::libs::backend::supabase::SupabaseSettings;
use crate::libs::core::error::ConfigError;
use crate::libs::core::models::non_empty;

pub const ENV_PREFIX: &str = "VIBOGRAM";

/// Keys without which the app cannot talk to its backend.
pub const REQUIRED_KEYS: [&str; 2] = ["supabase_url", "supabase_anon_key"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for this crate's targets; `RUST_LOG` overrides it.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_text_model: String,
    pub gemini_image_model: String,
    pub init_timeout_ms: u64,
    pub toast_lifetime_ms: u64,
    pub story_lifetime_hours: i64,
    pub http_timeout_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            gemini_text_model: "gemini-3-flash-preview".to_string(),
            gemini_image_model: "gemini-2.5-flash-image".to_string(),
            init_timeout_ms: 6_000,
            toast_lifetime_ms: 3_000,
            story_lifetime_hours: 24,
            http_timeout_secs: 30,
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigStatus {
    Ready,
    Missing(Vec<String>),
}

impl AppConfig {
    /// Defaults, then the optional TOML file, then `VIBOGRAM_*` environment
    /// variables (`VIBOGRAM_SUPABASE_URL`, `VIBOGRAM_LOGGING__LEVEL`, ...).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        let built = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.init_timeout_ms == 0 {
            return Err(ConfigError::Invalid("init_timeout_ms must be positive".to_string()));
        }
        if self.story_lifetime_hours <= 0 {
            return Err(ConfigError::Invalid(
                "story_lifetime_hours must be positive".to_string(),
            ));
        }
        if let Some(url) = non_empty(self.supabase_url.as_deref()) {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ConfigError::Invalid(format!(
                    "supabase_url must be an http(s) url, got {}",
                    url
                )));
            }
        }
        Ok(())
    }

    pub fn status(&self) -> ConfigStatus {
        let missing: Vec<String> = [
            (REQUIRED_KEYS[0], &self.supabase_url),
            (REQUIRED_KEYS[1], &self.supabase_anon_key),
        ]
        .iter()
        .filter(|(_, value)| non_empty(value.as_deref()).is_none())
        .map(|(key, _)| key.to_string())
        .collect();

        if missing.is_empty() {
            ConfigStatus::Ready
        } else {
            ConfigStatus::Missing(missing)
        }
    }

    pub fn supabase_settings(&self) -> Result<SupabaseSettings, ConfigError> {
        match (
            non_empty(self.supabase_url.as_deref()),
            non_empty(self.supabase_anon_key.as_deref()),
        ) {
            (Some(url), Some(anon_key)) => Ok(SupabaseSettings {
                url: url.to_string(),
                anon_key: anon_key.to_string(),
                http_timeout: self.http_timeout(),
            }),
            _ => match self.status() {
                ConfigStatus::Missing(keys) => Err(ConfigError::Missing { keys }),
                ConfigStatus::Ready => Err(ConfigError::Invalid("supabase settings".to_string())),
            },
        }
    }

    /// `None` when no AI key is configured; the assistant then answers with its fallback.
    pub fn gemini_settings(&self) -> Option<GeminiSettings> {
        non_empty(self.gemini_api_key.as_deref()).map(|api_key| GeminiSettings {
            api_key: api_key.to_string(),
            base_url: self.gemini_base_url.trim_end_matches('/').to_string(),
            text_model: self.gemini_text_model.clone(),
            image_model: self.gemini_image_model.clone(),
            http_timeout: self.http_timeout(),
        })
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn toast_lifetime(&self) -> Duration {
        Duration::from_millis(self.toast_lifetime_ms)
    }

    pub fn story_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.story_lifetime_hours)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
