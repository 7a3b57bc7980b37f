//! In-memory fakes shared by the integration tests.
//!
//! Deterministic stand-ins for the provider, identity service and history
//! store. Every fake records what it was asked so tests can assert on call
//! counts without any network access.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use whisperingwinds::auth::IdentityVerifier;
use whisperingwinds::engine::retry::{HourFallback, RetryPolicy};
use whisperingwinds::engine::AqiFetcher;
use whisperingwinds::provider::{AirQualityTransport, ApiResponse, ForecastLookup};
use whisperingwinds::storage::HistoryStore;
use whisperingwinds::types::{AirError, GeoPoint, Reading, UserId};

type Responder = dyn Fn(&ForecastLookup) -> Result<ApiResponse, AirError> + Send + Sync;

pub const CURRENT_BODY: &str = r#"{
    "dateTime": "2025-10-08T14:00:00Z",
    "regionCode": "in",
    "indexes": [{"code": "uaqi", "aqi": 72, "category": "Good air quality", "dominantPollutant": "o3"}],
    "pollutants": [{"code": "o3", "concentration": {"value": 31.2, "units": "PARTS_PER_BILLION"}}]
}"#;

pub fn forecast_body(date_time: &str, aqi: u32) -> String {
    format!(r#"{{"hourlyForecasts": [{{"dateTime": "{date_time}", "indexes": [{{"code": "uaqi", "aqi": {aqi}}}]}}]}}"#)
}

/// Provider fake driven by a closure over the forecast request.
pub struct ScriptedTransport {
    configured: bool,
    current: ApiResponse,
    forecast: Box<Responder>,
    current_calls: Arc<Mutex<u32>>,
    forecast_calls: Arc<Mutex<Vec<ForecastLookup>>>,
}

impl ScriptedTransport {
    pub fn new<F>(forecast: F) -> Self
    where
        F: Fn(&ForecastLookup) -> Result<ApiResponse, AirError> + Send + Sync + 'static,
    {
        Self {
            configured: true,
            current: ApiResponse::new(200, CURRENT_BODY),
            forecast: Box::new(forecast),
            current_calls: Arc::new(Mutex::new(0)),
            forecast_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every forecast call gets the same reply.
    pub fn always(status: u16, body: &str) -> Self {
        let response = ApiResponse::new(status, body);
        Self::new(move |_| Ok(response.clone()))
    }

    /// Behaves as if no API key were configured.
    pub fn unconfigured() -> Self {
        Self { configured: false, ..Self::always(200, "{}") }
    }

    pub fn with_current(mut self, status: u16, body: &str) -> Self {
        self.current = ApiResponse::new(status, body);
        self
    }

    pub fn current_calls(&self) -> u32 {
        *self.current_calls.lock().unwrap()
    }

    pub fn forecast_calls(&self) -> usize {
        self.forecast_calls.lock().unwrap().len()
    }

    /// Distinct hours requested by point lookups, in request order.
    pub fn requested_hours(&self) -> Vec<DateTime<Utc>> {
        let mut hours: Vec<DateTime<Utc>> = Vec::new();
        for lookup in self.forecast_calls.lock().unwrap().iter() {
            if let ForecastLookup::Hour { date_time, .. } = lookup {
                if hours.last() != Some(date_time) {
                    hours.push(*date_time);
                }
            }
        }
        hours
    }
}

#[async_trait]
impl AirQualityTransport for ScriptedTransport {
    fn ensure_configured(&self) -> Result<(), AirError> {
        if self.configured {
            Ok(())
        } else {
            Err(AirError::MissingApiKey { env_var: "GOOGLE_API_KEY".to_string() })
        }
    }

    async fn lookup_current(&self, _location: GeoPoint) -> Result<ApiResponse, AirError> {
        *self.current_calls.lock().unwrap() += 1;
        Ok(self.current.clone())
    }

    async fn lookup_forecast(&self, lookup: &ForecastLookup) -> Result<ApiResponse, AirError> {
        self.forecast_calls.lock().unwrap().push(lookup.clone());
        (self.forecast)(lookup)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Accepts exactly one token.
pub struct StaticVerifier {
    token: String,
    user: UserId,
}

impl StaticVerifier {
    pub fn new(token: &str, user: &str) -> Self {
        Self { token: token.to_string(), user: UserId::new(user) }
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AirError> {
        if token == self.token {
            Ok(self.user.clone())
        } else {
            Err(AirError::AuthRejected)
        }
    }
}

/// History store whose writes always fail. Reads return nothing.
#[derive(Default)]
pub struct FailingStore {
    pub append_attempts: Mutex<u32>,
}

#[async_trait]
impl HistoryStore for FailingStore {
    async fn append(&self, _user: &UserId, _reading: &Reading) -> Result<(), AirError> {
        *self.append_attempts.lock().unwrap() += 1;
        Err(AirError::Store("database is locked".to_string()))
    }

    async fn recent(&self, _user: &UserId, _limit: usize) -> Result<Vec<Reading>, AirError> {
        Ok(Vec::new())
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

/// Fetcher with no sleeps, default retry and fallback counts.
pub fn fast_fetcher(transport: Arc<ScriptedTransport>) -> AqiFetcher {
    AqiFetcher::with_policies(
        transport,
        RetryPolicy::immediate(5),
        HourFallback::new(5, Duration::ZERO),
    )
}
