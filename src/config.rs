//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (optional; every field has a default) and
//! deserializes into strongly-typed structs. Secrets (API keys, the
//! service-account path, the project id) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub forecast: ForecastConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Value of `Access-Control-Allow-Origin`.
    pub cors_allow_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_allow_origin: "*".to_string(),
        }
    }
}

/// Google Air Quality API settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key_env: String,
    pub base_url: String,
    pub language_code: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: "GOOGLE_API_KEY".to_string(),
            base_url: "https://airquality.googleapis.com/v1".to_string(),
            language_code: "en".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Knobs for the forecast fallback procedure.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ForecastConfig {
    /// Provider horizon; later targets are clamped to it.
    pub max_forecast_hours: i64,
    /// Lead time used when the caller gives no target.
    pub default_lead_hours: i64,
    /// Attempts per candidate hour.
    pub max_retries: u32,
    /// How many hours to walk back from the target (inclusive).
    pub max_back_offset_hours: u32,
    /// Backoff is `backoff_base_ms * 2^attempt`.
    pub backoff_base_ms: u64,
    /// Pause between candidate hours.
    pub candidate_pause_ms: u64,
    /// Overall deadline for one point-forecast lookup; 0 disables it.
    /// Must exceed [`ForecastConfig::worst_case`] or the walk is cut short.
    pub deadline_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            max_forecast_hours: 72,
            default_lead_hours: 24,
            max_retries: 5,
            max_back_offset_hours: 5,
            backoff_base_ms: 1000,
            candidate_pause_ms: 300,
            deadline_secs: 600,
        }
    }
}

impl ForecastConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn candidate_pause(&self) -> Duration {
        Duration::from_millis(self.candidate_pause_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Longest a full fallback walk can take when every request runs to
    /// `request_timeout`: all backoff sleeps, candidate pauses and requests.
    pub fn worst_case(&self, request_timeout: Duration) -> Duration {
        let hours = self.max_back_offset_hours.saturating_add(1);
        let backoff_per_hour = (1..self.max_retries).fold(Duration::ZERO, |acc, attempt| {
            acc.saturating_add(self.backoff_base().saturating_mul(2u32.saturating_pow(attempt)))
        });
        let requests = request_timeout
            .saturating_mul(self.max_retries)
            .saturating_mul(hours);

        backoff_per_hour
            .saturating_mul(hours)
            .saturating_add(self.candidate_pause().saturating_mul(hours - 1))
            .saturating_add(requests)
    }
}

/// Firebase identity settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// Web API key used for `accounts:lookup`.
    pub api_key_env: String,
    /// Env var holding the service-account JSON path.
    pub credentials_path_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_env: "FIREBASE_API_KEY".to_string(),
            credentials_path_env: "GOOGLE_APPLICATION_CREDENTIALS".to_string(),
            base_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    /// Env var holding the persistence project id.
    pub project_id_env: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://whisperingwinds.db".to_string(),
            project_id_env: "PROJECT_ID".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Like [`AppConfig::resolve_env`] but treats unset and blank the same.
    pub fn resolve_optional_env(env_name: &str) -> Option<String> {
        std::env::var(env_name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}
