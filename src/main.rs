//! WhisperingWinds API server.
//!
//! Entry point. Loads `.env` and configuration, initialises structured
//! logging, wires the identity verifier, air-quality fetcher and history
//! store together, and serves HTTP until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use whisperingwinds::auth::{FirebaseTokenVerifier, ServiceAccount};
use whisperingwinds::config::{AppConfig, StorageBackend};
use whisperingwinds::engine::AqiFetcher;
use whisperingwinds::provider::google::GoogleAirQualityClient;
use whisperingwinds::server::{self, ServiceState};
use whisperingwinds::storage::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_or_default(CONFIG_PATH)?;

    init_logging();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %cfg.server.host,
        port = cfg.server.port,
        backend = ?cfg.storage.backend,
        "WhisperingWinds starting up"
    );

    // -- Identity ----------------------------------------------------------

    let credentials_path = AppConfig::resolve_env(&cfg.auth.credentials_path_env)?;
    let account = ServiceAccount::from_file(&credentials_path)?;
    info!(project_id = %account.project_id, "Service account loaded");

    let project_id = AppConfig::resolve_optional_env(&cfg.storage.project_id_env)
        .unwrap_or_else(|| account.project_id.clone());

    let firebase_key = AppConfig::resolve_env(&cfg.auth.api_key_env)?;
    let verifier = Arc::new(FirebaseTokenVerifier::new(firebase_key, &cfg.auth)?);

    // -- Air quality provider ----------------------------------------------

    let provider_key = AppConfig::resolve_optional_env(&cfg.provider.api_key_env);
    if provider_key.is_none() {
        warn!(
            env_var = %cfg.provider.api_key_env,
            "Air quality API key not set; AQI lookups will fail until it is configured"
        );
    }
    let transport = Arc::new(GoogleAirQualityClient::new(provider_key, &cfg.provider)?);
    let worst_case = cfg.forecast.worst_case(Duration::from_secs(cfg.provider.timeout_secs));
    if cfg.forecast.deadline_secs > 0 && cfg.forecast.deadline() < worst_case {
        warn!(
            deadline_secs = cfg.forecast.deadline_secs,
            worst_case_secs = worst_case.as_secs(),
            "Forecast deadline is shorter than a full fallback walk; later candidate hours may be skipped"
        );
    }
    let fetcher = AqiFetcher::new(transport, &cfg.forecast);
    info!(
        provider = fetcher.provider_name(),
        max_retries = cfg.forecast.max_retries,
        max_back_offset_hours = cfg.forecast.max_back_offset_hours,
        "Air quality fetcher ready"
    );

    // -- History store -----------------------------------------------------

    let store: Arc<dyn HistoryStore> = match cfg.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryHistoryStore::new()),
        StorageBackend::Sqlite => Arc::new(
            SqliteHistoryStore::connect(&cfg.storage.database_url, project_id.clone())
                .await
                .context("Failed to open history store")?,
        ),
    };
    info!(backend = store.backend(), project_id = %project_id, "History store selected");

    // -- Serve -------------------------------------------------------------

    let state = Arc::new(ServiceState::new(verifier, fetcher, store));
    server::serve(state, &cfg.server).await?;

    info!("WhisperingWinds shut down cleanly");
    Ok(())
}

/// Initialise the tracing subscriber with env filter and optional JSON output.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("whisperingwinds=info"));

    let json_logging = std::env::var("WHISPERINGWINDS_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
