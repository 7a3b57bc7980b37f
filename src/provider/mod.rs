//! Air-quality provider integration.
//!
//! `AirQualityTransport` is the raw request/response seam to the
//! third-party API; `google` implements it. Response normalization lives
//! next to the client, while status classification (429, empty lists) is
//! left to the engine.

pub mod google;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{AirError, GeoPoint};

/// Raw provider reply. Any HTTP status is a valid `ApiResponse`; only
/// transport failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A forecast request: either one hour or a time window.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastLookup {
    Hour {
        location: GeoPoint,
        date_time: DateTime<Utc>,
    },
    Period {
        location: GeoPoint,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl ForecastLookup {
    pub fn location(&self) -> GeoPoint {
        match self {
            ForecastLookup::Hour { location, .. } | ForecastLookup::Period { location, .. } => {
                *location
            }
        }
    }
}

/// Abstraction over the air-quality REST API.
///
/// Implementors send exactly one outbound request per call and never
/// retry; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AirQualityTransport: Send + Sync {
    /// Fail fast when the transport cannot make calls at all
    /// (e.g. no API key configured).
    fn ensure_configured(&self) -> Result<(), AirError>;

    /// Current conditions at a coordinate.
    async fn lookup_current(&self, location: GeoPoint) -> Result<ApiResponse, AirError>;

    /// Forecast for one hour or a window.
    async fn lookup_forecast(&self, lookup: &ForecastLookup) -> Result<ApiResponse, AirError>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}
