//! Air-quality fetcher.
//!
//! Wraps an [`AirQualityTransport`] with the three lookups the service
//! offers:
//! - current conditions (fire-once, no retry)
//! - point forecast (hour fallback × retry-with-backoff, bounded by a deadline)
//! - series forecast (single request over a time window)

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::retry::{truncate_to_hour, Attempt, HourFallback, RetryPolicy};
use crate::config::ForecastConfig;
use crate::provider::google::{self, format_hour};
use crate::provider::{AirQualityTransport, ApiResponse, ForecastLookup};
use crate::types::{truncate_body, AirError, ForecastPoint, GeoPoint, Reading, SeriesForecast};

/// Provider forecast horizon in hours.
pub const MAX_FORECAST_HOURS: i64 = 72;

/// Lead time used when no target is given ("same hour tomorrow").
pub const DEFAULT_LEAD_HOURS: i64 = 24;

/// Status reported in `AirError::Provider` when no HTTP reply arrived.
pub const NO_RESPONSE_STATUS: u16 = 0;

pub struct AqiFetcher {
    transport: Arc<dyn AirQualityTransport>,
    retry: RetryPolicy,
    fallback: HourFallback,
    horizon: ChronoDuration,
    default_lead: ChronoDuration,
    deadline: Option<Duration>,
}

impl AqiFetcher {
    pub fn new(transport: Arc<dyn AirQualityTransport>, config: &ForecastConfig) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(config.max_retries, config.backoff_base()),
            fallback: HourFallback::new(config.max_back_offset_hours, config.candidate_pause()),
            horizon: ChronoDuration::hours(config.max_forecast_hours),
            default_lead: ChronoDuration::hours(config.default_lead_hours),
            deadline: (config.deadline_secs > 0).then(|| config.deadline()),
        }
    }

    /// Build with explicit policies, default horizon and no deadline.
    pub fn with_policies(
        transport: Arc<dyn AirQualityTransport>,
        retry: RetryPolicy,
        fallback: HourFallback,
    ) -> Self {
        Self {
            transport,
            retry,
            fallback,
            horizon: ChronoDuration::hours(MAX_FORECAST_HOURS),
            default_lead: ChronoDuration::hours(DEFAULT_LEAD_HOURS),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Current conditions at `location`, normalized into a [`Reading`].
    pub async fn fetch_current(&self, location: GeoPoint) -> Result<Reading, AirError> {
        location.validate()?;
        self.transport.ensure_configured()?;

        let response = self
            .transport
            .lookup_current(location)
            .await
            .map_err(surface_network_error)?;
        let reading = google::parse_current(&response, location);

        match &reading {
            Ok(r) => debug!(%location, aqi = ?r.aqi, "Current conditions fetched"),
            Err(e) => warn!(%location, error = %e, "Current conditions lookup failed"),
        }
        reading
    }

    /// Forecast AQI for the hour nearest `target_time` that the provider
    /// has data for, walking back up to the fallback limit.
    pub async fn fetch_point_forecast(
        &self,
        location: GeoPoint,
        target_time: Option<&str>,
    ) -> Result<ForecastPoint, AirError> {
        location.validate()?;
        self.transport.ensure_configured()?;

        let target = resolve_target_time(target_time, Utc::now(), self.default_lead, self.horizon)?;

        match self.deadline {
            Some(limit) => tokio::time::timeout(limit, self.walk_candidates(location, target))
                .await
                .unwrap_or_else(|_| {
                    warn!(%location, deadline_secs = limit.as_secs(), "Forecast lookup deadline exceeded");
                    Err(AirError::NoForecastAvailable {
                        detail: format!("deadline of {}s exceeded", limit.as_secs()),
                    })
                }),
            None => self.walk_candidates(location, target).await,
        }
    }

    async fn walk_candidates(
        &self,
        location: GeoPoint,
        target: DateTime<Utc>,
    ) -> Result<ForecastPoint, AirError> {
        let transport = &*self.transport;

        for (back_offset, hour) in self.fallback.candidates(target).enumerate() {
            if back_offset > 0 && !self.fallback.pause.is_zero() {
                tokio::time::sleep(self.fallback.pause).await;
            }

            let lookup = ForecastLookup::Hour { location, date_time: hour };
            debug!(%location, hour = %format_hour(hour), back_offset, "Fetching AQI forecast");

            let outcome = self
                .retry
                .run(|attempt| {
                    let lookup = lookup.clone();
                    async move {
                        let result = transport.lookup_forecast(&lookup).await;
                        classify_forecast(result, attempt)
                    }
                })
                .await;

            match outcome {
                Ok(point) => {
                    info!(%location, hour = %point.timestamp, aqi = %point.aqi, back_offset, "AQI forecast found");
                    return Ok(point);
                }
                Err(stop) => debug!(hour = %format_hour(hour), reason = %stop, "No forecast for candidate hour"),
            }
        }

        let tried = self.fallback.candidate_count();
        warn!(%location, target = %format_hour(target), tried, "Forecast fallback exhausted");
        Err(AirError::NoForecastAvailable {
            detail: format!("{tried} candidate hours tried back from {}", format_hour(target)),
        })
    }

    /// Hourly forecast over `[start_time, end_time]`, one request, no retry.
    pub async fn fetch_series_forecast(
        &self,
        location: GeoPoint,
        start_time: &str,
        end_time: &str,
    ) -> Result<SeriesForecast, AirError> {
        location.validate()?;
        let start = parse_timestamp(start_time)?;
        let end = parse_timestamp(end_time)?;
        if end <= start {
            return Err(AirError::InvalidRequest(
                "end_time must be later than start_time".to_string(),
            ));
        }
        self.transport.ensure_configured()?;

        let response = self
            .transport
            .lookup_forecast(&ForecastLookup::Period { location, start, end })
            .await
            .map_err(surface_network_error)?;
        let entries = google::parse_series(&response)?;

        debug!(%location, entries = entries.len(), "Series forecast fetched");
        Ok(SeriesForecast::from_entries(location, start, end, entries))
    }
}

/// Single-shot lookups have no retry to absorb a network failure, so it
/// is reported as a provider error with [`NO_RESPONSE_STATUS`].
fn surface_network_error(err: AirError) -> AirError {
    match err {
        AirError::Transport(detail) => {
            warn!(error = %detail, "Air quality provider unreachable");
            AirError::Provider { status: NO_RESPONSE_STATUS, body: detail }
        }
        other => other,
    }
}

/// Map one forecast reply onto the retry protocol.
///
/// 200 with data ⇒ done; 200 empty ⇒ give up this hour; 429 ⇒ retry;
/// other statuses ⇒ give up this hour; network failure ⇒ retry.
fn classify_forecast(result: Result<ApiResponse, AirError>, attempt: u32) -> Attempt<ForecastPoint> {
    match result {
        Ok(response) if response.status == 200 => match google::parse_forecast_hour(&response) {
            Ok(Some(point)) => Attempt::Done(point),
            Ok(None) => Attempt::GiveUp("no forecast data for hour".to_string()),
            Err(e) => Attempt::GiveUp(e.to_string()),
        },
        Ok(response) if response.status == 429 => {
            warn!(attempt, "Rate limit hit on forecast lookup");
            Attempt::Retry("rate limited (HTTP 429)".to_string())
        }
        Ok(response) => {
            warn!(status = response.status, body = %truncate_body(&response.body), "Forecast lookup rejected");
            Attempt::GiveUp(format!("HTTP {}", response.status))
        }
        Err(AirError::Transport(e)) => {
            warn!(attempt, error = %e, "Network error on forecast lookup");
            Attempt::Retry(format!("network error: {e}"))
        }
        Err(e) => Attempt::GiveUp(e.to_string()),
    }
}

/// Parse an RFC3339 timestamp. A missing offset is read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AirError> {
    let input = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }

    Err(AirError::InvalidTimeFormat { input: raw.to_string() })
}

/// Resolve the forecast target: the parsed `target`, or `now + default_lead`
/// truncated to the hour; then clamp to `now + horizon`.
pub fn resolve_target_time(
    target: Option<&str>,
    now: DateTime<Utc>,
    default_lead: ChronoDuration,
    horizon: ChronoDuration,
) -> Result<DateTime<Utc>, AirError> {
    let resolved = match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => parse_timestamp(raw)?,
        None => truncate_to_hour(now + default_lead),
    };

    let max_allowed = now + horizon;
    if resolved > max_allowed {
        info!(requested = %resolved, clamped = %max_allowed, "Requested forecast time too far out, clamping");
        return Ok(max_allowed);
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
