//! HTTP request handlers.

use super::AppState;
use crate::site::Site;
use crate::stats::{self, ChartError};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;
const DEFAULT_EVENT_LIMIT: i64 = 10;

fn not_found(what: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("{} not found", what))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "started_at": state.monitor.started_at(),
        "uptime": state.monitor.uptime().as_secs_f64(),
    }))
}

// ============================================================================
// Sites and status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SitesResponse<'a> {
    pub sites: &'a [Site],
    pub total: usize,
}

pub async fn handle_get_sites(State(state): State<AppState>) -> Response {
    let sites = state.monitor.sites();
    Json(SitesResponse {
        sites,
        total: sites.len(),
    })
    .into_response()
}

pub async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.status_snapshot())
}

pub async fn handle_get_overview(State(state): State<AppState>) -> impl IntoResponse {
    Json(stats::system_overview(&state.monitor))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub site: Option<String>,
    pub success: Option<String>,
    pub limit: Option<String>,
}

impl LogsQuery {
    /// `true` and `false` filter; anything else means no filter.
    fn success(&self) -> Option<bool> {
        match self.success.as_deref() {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    /// Out of range or unparseable limits fall back to the default.
    fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| (1..=MAX_LOG_LIMIT).contains(l))
            .unwrap_or(DEFAULT_LOG_LIMIT)
    }
}

pub async fn handle_get_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let site = query.site.as_deref().filter(|s| !s.is_empty());
    let limit = query.limit();

    match state.monitor.get_filtered_logs(site, query.success(), limit) {
        Ok(logs) => Json(serde_json::json!({
            "total": logs.len(),
            "logs": logs,
            "filters": {
                "site": site.unwrap_or_default(),
                "success": query.success(),
                "limit": limit,
            },
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Failed to query logs: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to get logs".to_string())
        }
    }
}

// ============================================================================
// Per-site reports
// ============================================================================

pub async fn handle_get_site_stats(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match stats::calculate_site_statistics(&state.monitor, &id) {
        Some(statistics) => Json(statistics).into_response(),
        None => not_found("site"),
    }
}

pub async fn handle_get_site_charts(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match stats::generate_chart_data(&state.monitor, &id) {
        Some(data) => Json(data).into_response(),
        None => not_found("site"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ChartQuery {
    pub range: Option<String>,
}

pub async fn handle_get_site_chart(
    State(state): State<AppState>,
    Path((id, chart)): Path<(String, String)>,
    Query(query): Query<ChartQuery>,
) -> Response {
    match stats::generate_chart_data_for_range(&state.monitor, &id, &chart, query.range.as_deref()) {
        Ok(data) => Json(data).into_response(),
        Err(ChartError::UnknownSite(_)) => not_found("site"),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

pub async fn handle_get_site_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    match stats::get_recent_events(&state.monitor, &id, limit) {
        Some(events) => Json(events).into_response(),
        None => not_found("site"),
    }
}

pub async fn handle_test_site(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    tracing::info!("Manual test requested for site {}", id);
    match state.scheduler.test_site(&id).await {
        Some(result) => Json(result).into_response(),
        None => not_found("site"),
    }
}

// ============================================================================
// Internals
// ============================================================================

pub async fn handle_get_breakers(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.breakers.snapshot())
}

pub async fn handle_get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.monitor.metrics().snapshot())
}
