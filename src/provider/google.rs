//! Google Air Quality API client.
//!
//! API: `https://airquality.googleapis.com/v1`
//! - `currentConditions:lookup`: current AQI, dominant pollutant, concentrations
//! - `forecast:lookup`: hourly forecast for one hour or a period (≤ 96h ahead)
//!
//! Auth: API key in the `key` query parameter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{AirQualityTransport, ApiResponse, ForecastLookup};
use crate::config::ProviderConfig;
use crate::types::{
    truncate_body, AirError, AqiValue, ForecastPoint, GeoPoint, PollutantConcentration, Reading,
    SeriesEntry,
};

/// Index code of the Universal AQI in the provider's index list.
pub const UNIVERSAL_AQI_CODE: &str = "uaqi";

/// Value shipped in sample `.env` files; treated as "no key".
const PLACEHOLDER_KEY: &str = "YOUR_API_KEY";

const CURRENT_COMPUTATIONS: &[&str] = &[
    "DOMINANT_POLLUTANT_CONCENTRATION",
    "POLLUTANT_CONCENTRATION",
];

const FORECAST_COMPUTATIONS: &[&str] = &[
    "POLLUTANT_ADDITIONAL_INFO",
    "DOMINANT_POLLUTANT_CONCENTRATION",
    "POLLUTANT_CONCENTRATION",
];

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CurrentConditionsRequest<'a> {
    location: GeoPoint,
    universal_aqi: bool,
    language_code: &'a str,
    extra_computations: &'static [&'static str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForecastRequest<'a> {
    location: GeoPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    period: Option<Period>,
    universal_aqi: bool,
    language_code: &'a str,
    extra_computations: &'static [&'static str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Period {
    start_time: String,
    end_time: String,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentConditionsResponse {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    region_code: Option<String>,
    #[serde(default)]
    indexes: Vec<AqiIndex>,
    #[serde(default)]
    pollutants: Vec<Pollutant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AqiIndex {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    aqi: Option<u32>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    dominant_pollutant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pollutant {
    code: String,
    #[serde(default)]
    concentration: Option<Concentration>,
}

#[derive(Debug, Deserialize)]
struct Concentration {
    value: f64,
    units: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastResponse {
    #[serde(default, alias = "forecasts")]
    hourly_forecasts: Vec<HourlyForecast>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HourlyForecast {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    indexes: Vec<AqiIndex>,
    #[serde(default)]
    pollutants: Vec<Pollutant>,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

fn provider_error(response: &ApiResponse) -> AirError {
    AirError::Provider {
        status: response.status,
        body: truncate_body(&response.body),
    }
}

/// Flatten the pollutant list into a code-keyed map. Entries without a
/// concentration, or with a negative/NaN value, are dropped.
fn flatten_pollutants(pollutants: &[Pollutant]) -> BTreeMap<String, PollutantConcentration> {
    pollutants
        .iter()
        .filter_map(|p| {
            let c = p.concentration.as_ref()?;
            (c.value.is_finite() && c.value >= 0.0).then(|| {
                (
                    p.code.clone(),
                    PollutantConcentration { value: c.value, units: c.units.clone() },
                )
            })
        })
        .collect()
}

fn parse_date_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Normalize a `currentConditions:lookup` reply into a [`Reading`].
///
/// Non-success statuses, malformed JSON and an empty index list all
/// become `AirError::Provider`; a partially populated reading is never
/// returned.
pub fn parse_current(response: &ApiResponse, location: GeoPoint) -> Result<Reading, AirError> {
    if !response.is_success() {
        return Err(provider_error(response));
    }

    let parsed: CurrentConditionsResponse =
        serde_json::from_str(&response.body).map_err(|_| provider_error(response))?;

    let index = parsed.indexes.first().ok_or_else(|| provider_error(response))?;

    Ok(Reading {
        aqi: index.aqi,
        category: index.category.clone(),
        dominant_pollutant: index.dominant_pollutant.clone(),
        pollutants: flatten_pollutants(&parsed.pollutants),
        timestamp: parse_date_time(parsed.date_time.as_deref()).unwrap_or_else(Utc::now),
        region_code: parsed.region_code,
        location: Some(location),
    })
}

/// Normalize a single-hour `forecast:lookup` reply.
///
/// Returns `Ok(None)` when the provider answered but had no forecast
/// entries for the hour.
pub fn parse_forecast_hour(response: &ApiResponse) -> Result<Option<ForecastPoint>, AirError> {
    if !response.is_success() {
        return Err(provider_error(response));
    }

    let parsed: ForecastResponse =
        serde_json::from_str(&response.body).map_err(|_| provider_error(response))?;

    let Some(first) = parsed.hourly_forecasts.first() else {
        return Ok(None);
    };

    let index = first
        .indexes
        .iter()
        .find(|i| i.code.as_deref() == Some(UNIVERSAL_AQI_CODE))
        .or_else(|| first.indexes.first());

    Ok(Some(ForecastPoint::new(
        first.date_time.clone().unwrap_or_default(),
        AqiValue::from(index.and_then(|i| i.aqi)),
    )))
}

/// Normalize a period `forecast:lookup` reply into series entries.
///
/// Only the Universal AQI index is read; entries without it are kept
/// with null AQI fields.
pub fn parse_series(response: &ApiResponse) -> Result<Vec<SeriesEntry>, AirError> {
    if !response.is_success() {
        return Err(provider_error(response));
    }

    let parsed: ForecastResponse =
        serde_json::from_str(&response.body).map_err(|_| provider_error(response))?;

    Ok(parsed
        .hourly_forecasts
        .iter()
        .map(|entry| {
            let uaqi = entry
                .indexes
                .iter()
                .find(|i| i.code.as_deref() == Some(UNIVERSAL_AQI_CODE));
            SeriesEntry {
                date_time: entry.date_time.clone().unwrap_or_default(),
                aqi: uaqi.and_then(|i| i.aqi),
                category: uaqi.and_then(|i| i.category.clone()),
                dominant_pollutant: uaqi.and_then(|i| i.dominant_pollutant.clone()),
                pollutants: flatten_pollutants(&entry.pollutants),
            }
        })
        .collect())
}

/// Hour-granular timestamp in the form the forecast endpoint expects.
pub fn format_hour(date_time: DateTime<Utc>) -> String {
    date_time.format("%Y-%m-%dT%H:00:00Z").to_string()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GoogleAirQualityClient {
    http: Client,
    api_key: Option<SecretString>,
    api_key_env: String,
    base_url: String,
    language_code: String,
}

impl GoogleAirQualityClient {
    pub fn new(api_key: Option<String>, config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("WhisperingWinds/0.1.0")
            .build()
            .context("Failed to build air quality HTTP client")?;

        Ok(Self {
            http,
            api_key: api_key.map(SecretString::new),
            api_key_env: config.api_key_env.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language_code: config.language_code.clone(),
        })
    }

    fn key(&self) -> Result<&str, AirError> {
        match self.api_key.as_ref().map(|k| k.expose_secret().trim()) {
            Some(k) if !k.is_empty() && k != PLACEHOLDER_KEY => Ok(k),
            _ => Err(AirError::MissingApiKey { env_var: self.api_key_env.clone() }),
        }
    }

    async fn post<B: Serialize + Sync>(&self, endpoint: &str, body: &B) -> Result<ApiResponse, AirError> {
        let key = self.key()?;
        let url = format!("{}/{endpoint}?key={}", self.base_url, urlencoding::encode(key));

        let resp = self
            .http
            .post(&url)
            .header("Accept-Language", "*")
            .json(body)
            .send()
            .await
            .map_err(|e| AirError::Transport(format!("{endpoint}: {}", e.without_url())))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| AirError::Transport(format!("{endpoint} body: {}", e.without_url())))?;

        debug!(endpoint, status, bytes = body.len(), "Air quality API replied");
        Ok(ApiResponse { status, body })
    }
}

#[async_trait]
impl AirQualityTransport for GoogleAirQualityClient {
    fn ensure_configured(&self) -> Result<(), AirError> {
        self.key().map(|_| ())
    }

    async fn lookup_current(&self, location: GeoPoint) -> Result<ApiResponse, AirError> {
        let request = CurrentConditionsRequest {
            location,
            universal_aqi: true,
            language_code: &self.language_code,
            extra_computations: CURRENT_COMPUTATIONS,
        };
        self.post("currentConditions:lookup", &request).await
    }

    async fn lookup_forecast(&self, lookup: &ForecastLookup) -> Result<ApiResponse, AirError> {
        let request = build_forecast_request(lookup, &self.language_code);
        self.post("forecast:lookup", &request).await
    }

    fn name(&self) -> &'static str {
        "google-air-quality"
    }
}

fn build_forecast_request<'a>(lookup: &ForecastLookup, language_code: &'a str) -> ForecastRequest<'a> {
    let (date_time, period) = match lookup {
        ForecastLookup::Hour { date_time, .. } => (Some(format_hour(*date_time)), None),
        ForecastLookup::Period { start, end, .. } => (
            None,
            Some(Period {
                start_time: start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end_time: end.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        ),
    };

    ForecastRequest {
        location: lookup.location(),
        date_time,
        period,
        universal_aqi: true,
        language_code,
        extra_computations: FORECAST_COMPUTATIONS,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
