//! Shared types for the WhisperingWinds backend.
//!
//! These types form the data model used across the provider client,
//! the forecast engine, the history store and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Reject NaN and out-of-range coordinates before they reach the provider.
    pub fn validate(&self) -> Result<(), AirError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AirError::InvalidRequest(format!(
                "latitude {} is outside -90..90",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AirError::InvalidRequest(format!(
                "longitude {} is outside -180..180",
                self.longitude
            )));
        }
        Ok(())
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity-provider user id (Firebase `localId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// Concentration of a single pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantConcentration {
    pub value: f64,
    pub units: String,
}

/// One air-quality observation, normalized from the provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub aqi: Option<u32>,
    pub category: Option<String>,
    pub dominant_pollutant: Option<String>,
    /// Pollutant code (e.g. "pm25") to concentration.
    #[serde(default)]
    pub pollutants: BTreeMap<String, PollutantConcentration>,
    pub timestamp: DateTime<Utc>,
    pub region_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl Reading {
    /// Minimal reading with only an AQI and timestamp.
    pub fn with_aqi(aqi: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            aqi: Some(aqi),
            category: None,
            dominant_pollutant: None,
            pollutants: BTreeMap::new(),
            timestamp,
            region_code: None,
            location: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AQI value
// ---------------------------------------------------------------------------

/// Provider AQI, or the "N/A" sentinel when the provider omitted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AqiValue {
    Index(u32),
    NotAvailable,
}

impl From<Option<u32>> for AqiValue {
    fn from(value: Option<u32>) -> Self {
        value.map(AqiValue::Index).unwrap_or(AqiValue::NotAvailable)
    }
}

impl fmt::Display for AqiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AqiValue::Index(v) => write!(f, "{v}"),
            AqiValue::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for AqiValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AqiValue::Index(v) => serializer.serialize_u32(*v),
            AqiValue::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for AqiValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Index(v) => Ok(AqiValue::Index(v)),
            Raw::Text(s) if s == "N/A" => Ok(AqiValue::NotAvailable),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a non-negative integer or \"N/A\", got {s:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Forecasts
// ---------------------------------------------------------------------------

/// One provider-returned forecast point (single-point mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Provider date-time string, e.g. "2025-10-09T14:00:00Z".
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub aqi: AqiValue,
}

impl ForecastPoint {
    pub fn new(timestamp: impl Into<String>, aqi: AqiValue) -> Self {
        let timestamp = timestamp.into();
        let date = timestamp.get(..10).unwrap_or_default().to_string();
        let time = timestamp.get(11..19).unwrap_or_default().to_string();
        Self { timestamp, date, time, aqi }
    }
}

/// One entry of a series forecast. Missing universal-AQI data is kept
/// as nulls rather than dropping the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub date_time: String,
    pub aqi: Option<u32>,
    pub category: Option<String>,
    pub dominant_pollutant: Option<String>,
    #[serde(default)]
    pub pollutants: BTreeMap<String, PollutantConcentration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Success,
    Empty,
}

/// Result of a series forecast lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesForecast {
    pub status: SeriesStatus,
    pub location: GeoPoint,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub count: usize,
    pub forecasts: Vec<SeriesEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SeriesForecast {
    pub fn from_entries(
        location: GeoPoint,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        forecasts: Vec<SeriesEntry>,
    ) -> Self {
        let (status, message) = if forecasts.is_empty() {
            (
                SeriesStatus::Empty,
                Some("No forecast data returned for the requested window".to_string()),
            )
        } else {
            (SeriesStatus::Success, None)
        };
        Self {
            status,
            location,
            start_time,
            end_time,
            count: forecasts.len(),
            forecasts,
            message,
        }
    }
}

/// One extrapolated value from the trend model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// 1-based hour offset from now.
    pub hour: u32,
    pub timestamp: DateTime<Utc>,
    pub predicted_aqi: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for WhisperingWinds.
#[derive(Debug, thiserror::Error)]
pub enum AirError {
    #[error("Invalid or expired token")]
    AuthRejected,

    #[error("Air quality provider error (status {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("Missing or invalid air quality API key; set {env_var} in the environment")]
    MissingApiKey { env_var: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid datetime format {input:?}. Use ISO 8601 (YYYY-MM-DDTHH:MM:SSZ)")]
    InvalidTimeFormat { input: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No forecast data available even after fallback attempts: {detail}")]
    NoForecastAvailable { detail: String },

    #[error("Insufficient data for forecasting: {0}")]
    InsufficientData(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Shorten a response body for logs and error messages.
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
