//! HTTP API: Axum router, CORS and the serve loop.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;

pub use routes::{AppState, ServiceState};

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let app = build_router(state, &config.cors_allow_origin);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "WhisperingWinds API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl-C, serving until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let origin = match allow_origin.trim() {
        "*" | "" => AllowOrigin::any(),
        exact => match HeaderValue::from_str(exact) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!(origin = exact, "Invalid CORS origin, allowing any");
                AllowOrigin::any()
            }
        },
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState, allow_origin: &str) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/auth/verify", post(routes::verify_token))
        .route("/aqi/current", get(routes::current_aqi))
        .route("/aqi/history", get(routes::aqi_history))
        .route("/aqi/forecast", get(routes::series_forecast))
        .route("/aqi/forecast/point", get(routes::point_forecast))
        .route("/aqi/trend", get(routes::aqi_trend))
        .layer(cors_layer(allow_origin))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockIdentityVerifier;
    use crate::engine::retry::{HourFallback, RetryPolicy};
    use crate::engine::AqiFetcher;
    use crate::provider::{ApiResponse, MockAirQualityTransport};
    use crate::storage::{MemoryHistoryStore, MockHistoryStore};
    use crate::types::{AirError, Reading, UserId};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::storage::HistoryStore;

    const CURRENT_OK: &str =
        r#"{"dateTime": "2025-10-08T14:00:00Z", "indexes": [{"code": "uaqi", "aqi": 63, "category": "Good air quality"}]}"#;

    fn verifier() -> MockIdentityVerifier {
        let mut mock = MockIdentityVerifier::new();
        mock.expect_verify().returning(|token| {
            if token == "good" {
                Ok(UserId::new("uid-1"))
            } else {
                Err(AirError::AuthRejected)
            }
        });
        mock
    }

    fn transport() -> MockAirQualityTransport {
        let mut mock = MockAirQualityTransport::new();
        mock.expect_ensure_configured().returning(|| Ok(()));
        mock.expect_name().return_const("mock");
        mock
    }

    fn state(transport: MockAirQualityTransport, store: Arc<dyn HistoryStore>) -> AppState {
        let fetcher = AqiFetcher::with_policies(
            Arc::new(transport),
            RetryPolicy::immediate(5),
            HourFallback::new(5, Duration::ZERO),
        );
        Arc::new(ServiceState::new(Arc::new(verifier()), fetcher, store))
    }

    fn default_state() -> AppState {
        state(transport(), Arc::new(MemoryHistoryStore::new()))
    }

    async fn send(state: AppState, method: &str, uri: &str) -> Response {
        build_router(state, "*")
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let resp = send(default_state(), "GET", "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_root_message() {
        let resp = send(default_state(), "GET", "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["message"], "Welcome to WhisperingWinds API");
    }

    #[tokio::test]
    async fn test_verify_token() {
        let resp = send(default_state(), "POST", "/auth/verify?token=good").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["uid"], "uid-1");

        let resp = send(default_state(), "POST", "/auth/verify?token=bad").await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_token_rejected_everywhere() {
        let uris = [
            "/aqi/current?lat=18.5&lon=73.8&token=bad",
            "/aqi/history?token=bad",
            "/aqi/forecast?lat=18.5&lon=73.8&start_time=2025-10-09T00:00:00Z&end_time=2025-10-09T06:00:00Z&token=bad",
            "/aqi/forecast/point?lat=18.5&lon=73.8&token=bad",
            "/aqi/trend?token=bad",
        ];
        for uri in uris {
            let mut t = MockAirQualityTransport::new();
            t.expect_lookup_current().never();
            t.expect_lookup_forecast().never();
            let resp = send(state(t, Arc::new(MemoryHistoryStore::new())), "GET", uri).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(json(resp).await["code"], "AUTH_REJECTED");
        }
    }

    #[tokio::test]
    async fn test_current_saves_reading_to_history() {
        let mut t = transport();
        t.expect_lookup_current()
            .times(1)
            .returning(|_| Ok(ApiResponse::new(200, CURRENT_OK)));
        let store = Arc::new(MemoryHistoryStore::new());
        let app = state(t, store.clone());

        let resp = send(app, "GET", "/aqi/current?lat=18.5308&lon=73.8442&token=good").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["aqi"], 63);

        let saved = store.recent(&UserId::new("uid-1"), 10).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].aqi, Some(63));
    }

    #[tokio::test]
    async fn test_saved_reading_stamped_at_save_time() {
        let mut t = transport();
        t.expect_lookup_current()
            .times(2)
            .returning(|_| Ok(ApiResponse::new(200, CURRENT_OK)));
        let store = Arc::new(MemoryHistoryStore::new());
        let app = state(t, store.clone());
        let before = Utc::now();

        let resp = send(app.clone(), "GET", "/aqi/current?lat=1&lon=2&token=good").await;
        let provider_time = Utc.with_ymd_and_hms(2025, 10, 8, 14, 0, 0).unwrap();
        assert_eq!(json(resp).await["timestamp"], "2025-10-08T14:00:00Z");
        tokio::time::sleep(Duration::from_millis(5)).await;
        send(app, "GET", "/aqi/current?lat=1&lon=2&token=good").await;

        let saved = store.recent(&UserId::new("uid-1"), 10).await.unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|r| r.timestamp >= before && r.timestamp != provider_time));
        assert!(saved[0].timestamp > saved[1].timestamp);
    }

    #[tokio::test]
    async fn test_current_survives_store_failure() {
        let mut t = transport();
        t.expect_lookup_current()
            .returning(|_| Ok(ApiResponse::new(200, CURRENT_OK)));
        let mut store = MockHistoryStore::new();
        store.expect_append()
            .times(1)
            .returning(|_, _| Err(AirError::Store("disk full".into())));
        store.expect_backend().return_const("mock");

        let resp = send(state(t, Arc::new(store)), "GET", "/aqi/current?lat=1&lon=2&token=good").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_current_without_aqi_not_saved() {
        let mut t = transport();
        t.expect_lookup_current().returning(|_| {
            Ok(ApiResponse::new(200, r#"{"indexes": [{"code": "uaqi", "category": "Unknown"}]}"#))
        });
        let mut store = MockHistoryStore::new();
        store.expect_append().never();

        let resp = send(state(t, Arc::new(store)), "GET", "/aqi/current?lat=1&lon=2&token=good").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(json(resp).await["aqi"].is_null());
    }

    #[tokio::test]
    async fn test_current_provider_failure_is_not_found() {
        let mut t = transport();
        t.expect_lookup_current()
            .returning(|_| Ok(ApiResponse::new(500, "internal")));

        let resp = send(state(t, Arc::new(MemoryHistoryStore::new())), "GET", "/aqi/current?lat=1&lon=2&token=good").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(resp).await["detail"], "No AQI data found");
    }

    #[tokio::test]
    async fn test_current_bad_params() {
        let resp = send(default_state(), "GET", "/aqi/current?lat=abc&lon=2&token=good").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["code"], "INVALID_REQUEST");

        let resp = send(default_state(), "GET", "/aqi/current?lat=95&lon=2&token=good").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let store = Arc::new(MemoryHistoryStore::new());
        let user = UserId::new("uid-1");
        let base = Utc.with_ymd_and_hms(2025, 10, 8, 0, 0, 0).unwrap();
        for i in 0..15 {
            store
                .append(&user, &Reading::with_aqi(i, base + ChronoDuration::hours(i as i64)))
                .await
                .unwrap();
        }

        let resp = send(state(transport(), store), "GET", "/aqi/history?token=good").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["user_id"], "uid-1");
        let records = body["records"].as_array().unwrap();
        assert_eq!(records.len(), 10);
        assert_eq!(records[0]["aqi"], 14);
    }

    #[tokio::test]
    async fn test_history_store_failure_is_server_error() {
        let mut store = MockHistoryStore::new();
        store.expect_recent()
            .returning(|_, _| Err(AirError::Store("locked".into())));

        let resp = send(state(transport(), Arc::new(store)), "GET", "/aqi/history?token=good").await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_trend_extrapolates_history() {
        let store = Arc::new(MemoryHistoryStore::new());
        let user = UserId::new("uid-1");
        let base = Utc.with_ymd_and_hms(2025, 10, 8, 0, 0, 0).unwrap();
        for (i, aqi) in [10, 20, 30].into_iter().enumerate() {
            store
                .append(&user, &Reading::with_aqi(aqi, base + ChronoDuration::hours(i as i64)))
                .await
                .unwrap();
        }

        let resp = send(state(transport(), store), "GET", "/aqi/trend?token=good&hours_ahead=2").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        let forecast = body["forecast"].as_array().unwrap();
        assert_eq!(forecast.len(), 2);
        assert_eq!(forecast[0]["predicted_aqi"], 50.0);
        assert_eq!(forecast[1]["predicted_aqi"], 60.0);
    }

    #[tokio::test]
    async fn test_trend_without_history() {
        let resp = send(default_state(), "GET", "/aqi/trend?token=good").await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(resp).await["code"], "INSUFFICIENT_DATA");
    }

    #[tokio::test]
    async fn test_trend_hours_ahead_bounds() {
        for h in [0, 73] {
            let uri = format!("/aqi/trend?token=good&hours_ahead={h}");
            let resp = send(default_state(), "GET", &uri).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_series_forecast_bad_window() {
        let resp = send(
            default_state(),
            "GET",
            "/aqi/forecast?lat=1&lon=2&start_time=2025-10-09T06:00:00Z&end_time=2025-10-09T00:00:00Z&token=good",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_series_forecast_success() {
        let mut t = transport();
        t.expect_lookup_forecast().times(1).returning(|_| {
            Ok(ApiResponse::new(
                200,
                r#"{"hourlyForecasts": [
                    {"dateTime": "2025-10-09T00:00:00Z", "indexes": [{"code": "uaqi", "aqi": 50}]},
                    {"dateTime": "2025-10-09T01:00:00Z", "indexes": [{"code": "uaqi", "aqi": 55}]}
                ]}"#,
            ))
        });

        let resp = send(
            state(t, Arc::new(MemoryHistoryStore::new())),
            "GET",
            "/aqi/forecast?lat=1&lon=2&start_time=2025-10-09T00:00:00Z&end_time=2025-10-09T06:00:00Z&token=good",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_point_forecast_missing_key() {
        let mut t = MockAirQualityTransport::new();
        t.expect_ensure_configured()
            .returning(|| Err(AirError::MissingApiKey { env_var: "GOOGLE_API_KEY".into() }));
        t.expect_lookup_forecast().never();

        let resp = send(
            state(t, Arc::new(MemoryHistoryStore::new())),
            "GET",
            "/aqi/forecast/point?lat=1&lon=2&token=good",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(resp).await["code"], "MISSING_API_KEY");
    }

    #[tokio::test]
    async fn test_point_forecast_invalid_time() {
        let resp = send(
            default_state(),
            "GET",
            "/aqi/forecast/point?lat=1&lon=2&target_time=soon&token=good",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["code"], "INVALID_TIME_FORMAT");
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let resp = build_router(default_state(), "*")
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }
}
