//! HTTP route handlers.
//!
//! All endpoints return JSON. Authenticated endpoints take the ID token as
//! a `token` query parameter. Errors are rendered as
//! `{"detail": ..., "code": ...}`.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::IdentityVerifier;
use crate::engine::trend::{self, DEFAULT_HOURS_AHEAD, MAX_HOURS_AHEAD};
use crate::engine::AqiFetcher;
use crate::storage::HistoryStore;
use crate::types::{AirError, ForecastPoint, GeoPoint, Reading, SeriesForecast, TrendPoint, UserId};

pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_TREND_WINDOW: usize = 24;
pub const MAX_HISTORY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Collaborators shared by all handlers.
pub struct ServiceState {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub fetcher: AqiFetcher,
    pub store: Arc<dyn HistoryStore>,
}

impl ServiceState {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        fetcher: AqiFetcher,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self { verifier, fetcher, store }
    }
}

pub type AppState = Arc<ServiceState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
    pub code: String,
}

/// An error ready to be rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, detail: impl Into<String>) -> Self {
        Self { status, code, detail: detail.into() }
    }

    fn no_aqi_data() -> Self {
        Self::new(StatusCode::NOT_FOUND, "NO_AQI_DATA", "No AQI data found")
    }
}

impl From<AirError> for ApiError {
    fn from(err: AirError) -> Self {
        let detail = err.to_string();
        let (status, code) = match &err {
            AirError::AuthRejected => (StatusCode::UNAUTHORIZED, "AUTH_REJECTED"),
            AirError::Provider { .. } => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR"),
            AirError::MissingApiKey { .. } => (StatusCode::SERVICE_UNAVAILABLE, "MISSING_API_KEY"),
            AirError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            AirError::InvalidTimeFormat { .. } => (StatusCode::BAD_REQUEST, "INVALID_TIME_FORMAT"),
            AirError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            AirError::NoForecastAvailable { .. } => (StatusCode::NOT_FOUND, "NO_FORECAST_AVAILABLE"),
            AirError::InsufficientData(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_DATA"),
            AirError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            AirError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
        };
        if status.is_server_error() {
            error!(code, error = %detail, "Request failed");
        }
        Self::new(status, code, detail)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { detail: self.detail, code: self.code.to_string() };
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for AirError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn authenticate(state: &ServiceState, token: &str) -> Result<UserId, ApiError> {
    state.verifier.verify(token).await.map_err(|e| {
        warn!(error = %e, "Rejected request token");
        ApiError::from(AirError::AuthRejected)
    })
}

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct CurrentQuery {
    pub lat: f64,
    pub lon: f64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub token: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub lat: f64,
    pub lon: f64,
    pub start_time: String,
    pub end_time: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PointQuery {
    pub lat: f64,
    pub lon: f64,
    pub target_time: Option<String>,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub token: String,
    pub hours_ahead: Option<u32>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub uid: UserId,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub user_id: UserId,
    pub records: Vec<Reading>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrendResponse {
    pub user_id: UserId,
    pub forecast: Vec<TrendPoint>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse { message: "Welcome to WhisperingWinds API".to_string() })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /auth/verify?token=
pub async fn verify_token(
    State(state): State<AppState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
) -> ApiResult<VerifyResponse> {
    let Query(q) = query?;
    let uid = authenticate(&state, &q.token).await?;
    Ok(Json(VerifyResponse { uid, message: "Token is valid".to_string() }))
}

/// GET /aqi/current?lat&lon&token
///
/// Readings with an AQI are appended to the caller's history, stamped with
/// the save time rather than the provider's hourly `dateTime`. A failed
/// append is logged and does not fail the request.
pub async fn current_aqi(
    State(state): State<AppState>,
    query: Result<Query<CurrentQuery>, QueryRejection>,
) -> ApiResult<Reading> {
    let Query(q) = query?;
    let uid = authenticate(&state, &q.token).await?;

    let reading = state
        .fetcher
        .fetch_current(GeoPoint::new(q.lat, q.lon))
        .await
        .map_err(|e| match e {
            AirError::Provider { .. } | AirError::Transport(_) => ApiError::no_aqi_data(),
            other => ApiError::from(other),
        })?;

    if reading.aqi.is_none() {
        info!(uid = %uid, "Reading has no AQI, not saving to history");
    } else if let Err(e) = state.store.append(&uid, &stamped_now(&reading)).await {
        warn!(uid = %uid, backend = state.store.backend(), error = %e, "Failed to save reading to history");
    }

    Ok(Json(reading))
}

fn stamped_now(reading: &Reading) -> Reading {
    Reading { timestamp: Utc::now(), ..reading.clone() }
}

/// GET /aqi/history?token&limit=10
pub async fn aqi_history(
    State(state): State<AppState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<HistoryResponse> {
    let Query(q) = query?;
    let uid = authenticate(&state, &q.token).await?;

    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    let records = state.store.recent(&uid, limit).await?;

    Ok(Json(HistoryResponse { user_id: uid, records }))
}

/// GET /aqi/forecast?lat&lon&start_time&end_time&token
pub async fn series_forecast(
    State(state): State<AppState>,
    query: Result<Query<SeriesQuery>, QueryRejection>,
) -> ApiResult<SeriesForecast> {
    let Query(q) = query?;
    authenticate(&state, &q.token).await?;

    let series = state
        .fetcher
        .fetch_series_forecast(GeoPoint::new(q.lat, q.lon), &q.start_time, &q.end_time)
        .await?;
    Ok(Json(series))
}

/// GET /aqi/forecast/point?lat&lon&target_time&token
pub async fn point_forecast(
    State(state): State<AppState>,
    query: Result<Query<PointQuery>, QueryRejection>,
) -> ApiResult<ForecastPoint> {
    let Query(q) = query?;
    authenticate(&state, &q.token).await?;

    let point = state
        .fetcher
        .fetch_point_forecast(GeoPoint::new(q.lat, q.lon), q.target_time.as_deref())
        .await?;
    Ok(Json(point))
}

/// GET /aqi/trend?token&hours_ahead=6&limit=24
pub async fn aqi_trend(
    State(state): State<AppState>,
    query: Result<Query<TrendQuery>, QueryRejection>,
) -> ApiResult<TrendResponse> {
    let Query(q) = query?;
    let uid = authenticate(&state, &q.token).await?;

    let hours_ahead = q.hours_ahead.unwrap_or(DEFAULT_HOURS_AHEAD);
    if !(1..=MAX_HOURS_AHEAD).contains(&hours_ahead) {
        return Err(AirError::InvalidRequest(format!(
            "hours_ahead must be between 1 and {MAX_HOURS_AHEAD}"
        ))
        .into());
    }

    let limit = q.limit.unwrap_or(DEFAULT_TREND_WINDOW).min(MAX_HISTORY_LIMIT);
    let history = state.store.recent(&uid, limit).await?;
    let forecast = trend::forecast(&history, hours_ahead)?;

    Ok(Json(TrendResponse { user_id: uid, forecast }))
}
