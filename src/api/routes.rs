//! API Routes
//!
//! Dashboard endpoints over the stats cache, plus health and metrics.

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::Metrics;
use crate::cache::StatsCache;
use crate::config::MonitorConfig;
use crate::types::{PeerRecord, Tier};

/// Shared API state
pub struct ApiState {
    pub cache: Arc<StatsCache>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Default, Deserialize)]
struct RefreshParams {
    #[serde(default)]
    refresh: bool,
}

/// Build the router; split out so tests can drive it without a socket
pub fn router(state: Arc<ApiState>) -> Router {
    let dashboard = Router::new()
        .route("/api/electrumx/stats", get(get_stats))
        .route("/api/electrumx/servers", get(get_servers))
        .route("/api/health", get(health_check))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::PRAGMA,
            HeaderValue::from_static("no-cache"),
        ));

    Router::new()
        // Health
        .route("/health", get(health_check))

        // Metrics
        .route("/metrics", get(get_metrics_prometheus))
        .route("/metrics/json", get(get_metrics_json))

        .merge(dashboard)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_api_server(
    config: Arc<MonitorConfig>,
    cache: Arc<StatsCache>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let state = Arc::new(ApiState { cache, metrics });
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    info!("📊 HTTP API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn unavailable(message: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": message, "timestamp": timestamp() })),
    )
        .into_response()
}

/// GET /health and /api/health
async fn health_check(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let up = state
        .cache
        .get(Tier::Light, false)
        .await
        .map(|stats| stats.is_server_known())
        .unwrap_or(false);

    Json(serde_json::json!({
        "status": if up { "healthy" } else { "degraded" },
        "services": { "electrumx": if up { "up" } else { "down" } },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp(),
    }))
}

/// GET /api/electrumx/stats - light tier, heavy as fallback
async fn get_stats(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RefreshParams>,
) -> Response {
    state.metrics.inc_api_requests();

    let stats = match state.cache.get(Tier::Light, params.refresh).await {
        Some(stats) => Some(stats),
        None => state.cache.get(Tier::Heavy, false).await,
    };

    match stats {
        Some(stats) => Json(serde_json::json!({
            "stats": stats,
            "timestamp": timestamp(),
        }))
        .into_response(),
        None => unavailable("Cannot connect to ElectrumX server"),
    }
}

/// GET /api/electrumx/servers - heavy tier, light servers when heavy has none
async fn get_servers(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<RefreshParams>,
) -> Response {
    state.metrics.inc_api_requests();

    let heavy = state.cache.get(Tier::Heavy, params.refresh).await;
    let servers: Option<Vec<PeerRecord>> = match heavy {
        Some(stats) if stats.active_servers_count > 0 => Some(stats.active_servers),
        heavy => match state.cache.get(Tier::Light, false).await {
            Some(light) if light.active_servers_count > 0 => Some(light.active_servers),
            _ => heavy.map(|stats| stats.active_servers),
        },
    };

    match servers {
        Some(servers) => Json(serde_json::json!({
            "total": servers.len(),
            "servers": servers,
            "timestamp": timestamp(),
        }))
        .into_response(),
        None => unavailable("Cannot connect to ElectrumX server"),
    }
}

/// GET /metrics - Prometheus format metrics
async fn get_metrics_prometheus(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.to_prometheus(),
    )
}

/// GET /metrics/json - JSON format metrics
async fn get_metrics_json(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{snapshot, ScriptedSource};
    use crate::cache::CachePolicy;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app(script: Vec<Option<crate::types::StatsSnapshot>>) -> (Router, Arc<ScriptedSource>) {
        let source = Arc::new(ScriptedSource::new(script));
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(StatsCache::new(source.clone(), CachePolicy::default(), metrics.clone()));
        (router(Arc::new(ApiState { cache, metrics })), source)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_stats_route_serves_light_snapshot() {
        let (app, _) = test_app(vec![Some(snapshot("ElectrumX 1.16.0", &["a.example"]))]);

        let (status, headers, body) = get_json(app, "/api/electrumx/stats").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["server_version"], "ElectrumX 1.16.0");
        assert_eq!(body["stats"]["active_servers_count"], 1);
        assert!(body["timestamp"].is_string());
        assert_eq!(headers[header::CACHE_CONTROL], "no-store, no-cache, must-revalidate");
        assert_eq!(headers[header::PRAGMA], "no-cache");
    }

    #[tokio::test]
    async fn test_stats_route_unavailable_without_data() {
        let (app, source) = test_app(vec![None]);

        let (status, _, body) = get_json(app, "/api/electrumx/stats").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
        // Light failed, then the heavy fallback was tried
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_servers_route_falls_back_to_light_servers() {
        // Heavy is acquired first and comes back empty; light has peers
        let (app, _) = test_app(vec![
            Some(snapshot("v1", &[])),
            Some(snapshot("v1", &["a.example", "b.example"])),
        ]);

        let (status, _, body) = get_json(app, "/api/electrumx/servers").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["servers"][0]["host"], "a.example");
    }

    #[tokio::test]
    async fn test_servers_route_prefers_heavy_servers() {
        let (app, source) = test_app(vec![Some(snapshot("v1", &["a.example", "b.example", "c.example"]))]);

        let (_, _, body) = get_json(app, "/api/electrumx/servers").await;

        assert_eq!(body["total"], 3);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_param_forces_acquisition() {
        let (app, source) = test_app(vec![Some(snapshot("v1", &[])), Some(snapshot("v2", &[]))]);

        let (_, _, first) = get_json(app.clone(), "/api/electrumx/stats").await;
        let (_, _, cached) = get_json(app.clone(), "/api/electrumx/stats").await;
        let (_, _, refreshed) = get_json(app, "/api/electrumx/stats?refresh=true").await;

        assert_eq!(first["stats"]["server_version"], "v1");
        assert_eq!(cached["stats"]["server_version"], "v1");
        assert_eq!(refreshed["stats"]["server_version"], "v2");
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_health_reflects_index_server() {
        let (app, _) = test_app(vec![Some(snapshot("ElectrumX 1.16.0", &[]))]);
        let (status, headers, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["electrumx"], "up");
        assert!(headers.get(header::PRAGMA).is_none());

        let (app, _) = test_app(vec![Some(crate::types::StatsSnapshot::default())]);
        let (_, _, body) = get_json(app, "/api/health").await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["services"]["electrumx"], "down");
    }

    #[tokio::test]
    async fn test_metrics_routes() {
        let (app, _) = test_app(vec![Some(snapshot("v1", &["a.example"]))]);

        get_json(app.clone(), "/api/electrumx/stats").await;
        let (_, _, json) = get_json(app.clone(), "/metrics/json").await;
        assert_eq!(json["api_requests"], 1);
        assert_eq!(json["cache"]["light"]["refreshes"], 1);
        assert_eq!(json["cache"]["light"]["index_server"]["active_servers"], 1);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("electrumx_monitor_active_servers{tier=\"light\"} 1"));
        assert!(text.contains("electrumx_monitor_active_servers{tier=\"heavy\"} 0"));
    }
}
