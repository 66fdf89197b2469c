//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, StorageInfo};
use crate::report::render_text_report;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const DEFAULT_RECENT_HOURS: u32 = 24;
const DEFAULT_OUTAGE_DAYS: u32 = 7;
const DEFAULT_HEATMAP_DAYS: u32 = 30;
const DEFAULT_ARCHIVE_DAYS: u32 = 90;

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PatternQuery {
    pub hour: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub targets: Vec<String>,
    pub interval_secs: f64,
    pub timeout_secs: f64,
    pub storage: StorageInfo,
}

fn json_or_unavailable<T: Serialize>(result: Result<T, DbError>) -> Response {
    match result {
        Ok(v) => Json(v).into_response(),
        Err(e) => {
            tracing::error!("API: query failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

pub async fn handle_recent(
    State(state): State<AppState>,
    Query(q): Query<HoursQuery>,
) -> Response {
    let hours = q.hours.unwrap_or(DEFAULT_RECENT_HOURS);
    json_or_unavailable(state.store.recent(hours.into()))
}

pub async fn handle_stats(State(state): State<AppState>, Query(q): Query<HoursQuery>) -> Response {
    let hours = q.hours.unwrap_or(DEFAULT_RECENT_HOURS);
    json_or_unavailable(state.store.stats(hours.into()))
}

/// Outages by the sliding-window definition.
pub async fn handle_outages(State(state): State<AppState>, Query(q): Query<DaysQuery>) -> Response {
    let days = q.days.unwrap_or(DEFAULT_OUTAGE_DAYS);
    json_or_unavailable(state.store.outages_sliding(days.into()))
}

pub async fn handle_consecutive_outages(
    State(state): State<AppState>,
    Query(q): Query<DaysQuery>,
) -> Response {
    let days = q.days.unwrap_or(DEFAULT_OUTAGE_DAYS);
    json_or_unavailable(state.store.outages_simple(days.into()))
}

pub async fn handle_heatmap(State(state): State<AppState>, Query(q): Query<DaysQuery>) -> Response {
    let days = q.days.unwrap_or(DEFAULT_HEATMAP_DAYS);
    json_or_unavailable(state.store.heatmap(days.into()))
}

pub async fn handle_patterns(
    State(state): State<AppState>,
    Query(q): Query<PatternQuery>,
) -> Response {
    match q.hour {
        Some(hour) if hour <= 23 => json_or_unavailable(state.store.pattern_detail(hour)),
        _ => (StatusCode::BAD_REQUEST, "hour must be between 0 and 23").into_response(),
    }
}

pub async fn handle_archive(State(state): State<AppState>, Query(q): Query<DaysQuery>) -> Response {
    let days = q.days.unwrap_or(DEFAULT_ARCHIVE_DAYS);
    json_or_unavailable(state.store.archived_stats(days.into()))
}

pub async fn handle_status(State(state): State<AppState>) -> Response {
    json_or_unavailable(state.store.storage_info().map(|storage| StatusResponse {
        targets: state.config.targets.clone(),
        interval_secs: state.config.interval.as_secs_f64(),
        timeout_secs: state.config.timeout.as_secs_f64(),
        storage,
    }))
}

/// Plain-text summary, same content as the report file.
pub async fn handle_report(State(state): State<AppState>, Query(q): Query<HoursQuery>) -> Response {
    let hours = q.hours.unwrap_or(DEFAULT_RECENT_HOURS);
    match render_text_report(&state.store, hours.into(), Utc::now()) {
        Ok(text) => text.into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ServerConfig;
    use crate::db::{Sample, Store};
    use crate::web::Server;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn router() -> (NamedTempFile, Arc<Store>, Router) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let server = Server::new(ServerConfig::default(), store.clone());
        (tmp, store, server.routes())
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_recent_and_stats() {
        let (_tmp, store, router) = router();
        let now = Utc::now();
        store.append(&Sample::success("8.8.8.8", now, 12.5)).unwrap();
        store.append(&Sample::failure("8.8.8.8", now, "timeout")).unwrap();

        let (status, body) = get(router.clone(), "/api/recent?hours=1").await;
        assert_eq!(status, StatusCode::OK);
        let recent: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(recent.as_array().unwrap().len(), 2);

        let (status, body) = get(router, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats[0]["target"], "8.8.8.8");
        assert_eq!(stats[0]["total_pings"], 2);
        assert_eq!(stats[0]["packet_loss"], 50.0);
    }

    #[tokio::test]
    async fn test_outage_routes() {
        let (_tmp, store, router) = router();
        let base = Utc::now() - ChronoDuration::minutes(5);
        for i in 0..4 {
            let ts = base + ChronoDuration::seconds(i);
            store.append(&Sample::failure("1.1.1.1", ts, "down")).unwrap();
        }

        let (status, body) = get(router.clone(), "/api/outages/consecutive?days=1").await;
        assert_eq!(status, StatusCode::OK);
        let outages: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(outages.as_array().unwrap().len(), 1);
        assert_eq!(outages[0]["failed_checks"], 4);

        // four samples never fill a ten-sample window
        let (status, body) = get(router, "/api/outages").await;
        assert_eq!(status, StatusCode::OK);
        let outages: Value = serde_json::from_slice(&body).unwrap();
        assert!(outages.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patterns_requires_valid_hour() {
        let (_tmp, _store, router) = router();

        let (status, _) = get(router.clone(), "/api/patterns").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(router.clone(), "/api/patterns?hour=24").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(router, "/api/patterns?hour=0").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_heatmap_after_aggregation() {
        let (_tmp, store, router) = router();
        store.append(&Sample::success("1.1.1.1", Utc::now(), 3.0)).unwrap();
        store.aggregate_recent().unwrap();

        let (status, body) = get(router, "/api/heatmap?days=1").await;
        assert_eq!(status, StatusCode::OK);
        let points: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(points[0]["target"], "1.1.1.1");
        assert_eq!(points[0]["failure_rate"], 0.0);
    }

    #[tokio::test]
    async fn test_status_and_archive() {
        let (_tmp, _store, router) = router();

        let (status, body) = get(router.clone(), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let info: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(info["targets"].as_array().unwrap().len(), 3);
        assert_eq!(info["storage"]["raw_samples"], 0);

        let (status, body) = get(router, "/api/archive").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"[]");
    }

    #[tokio::test]
    async fn test_report_is_plain_text() {
        let (_tmp, _store, router) = router();
        let response = router
            .oneshot(Request::builder().uri("/api/report").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("No significant outages detected."));
    }

    #[tokio::test]
    async fn test_largest_windows_are_accepted() {
        let (_tmp, store, router) = router();
        store.append(&Sample::success("8.8.8.8", Utc::now(), 12.5)).unwrap();

        let (status, body) = get(router.clone(), "/api/recent?hours=4294967295").await;
        assert_eq!(status, StatusCode::OK);
        let recent: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(recent.as_array().unwrap().len(), 1);

        for uri in [
            "/api/stats?hours=4294967295",
            "/api/outages?days=4294967295",
            "/api/outages/consecutive?days=4294967295",
            "/api/heatmap?days=4294967295",
            "/api/archive?days=4294967295",
            "/api/report?hours=4294967295",
        ] {
            let (status, _) = get(router.clone(), uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
        }

        // beyond u32 is rejected by the extractor
        let (status, _) = get(router, "/api/recent?hours=4294967296").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_failure_is_service_unavailable() {
        let (tmp, _store, router) = router();
        let other = rusqlite::Connection::open(tmp.path()).unwrap();
        other.execute_batch("DROP TABLE ping_results;").unwrap();

        let (status, _) = get(router, "/api/recent").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
