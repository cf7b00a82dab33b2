//! Minimal HTTP/JSON control surface over `network-ids-core`.
//!
//! Exposes exactly the operations named in the core's external interface —
//! no detection logic lives here.

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use network_ids_core::{AlertStatus, Classification, ConfigOptions, CoreError, NetworkIds};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

#[derive(Clone)]
struct AppState {
    ids: Arc<NetworkIds>,
}

/// Uniform response envelope for every route.
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(status: StatusCode, data: T) -> Response {
        let body = Self { success: true, data: Some(data), error: None, timestamp: Utc::now() };
        (status, Json(body)).into_response()
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> { success: false, data: None, error: Some(message.into()), timestamp: Utc::now() };
    (status, Json(body)).into_response()
}

fn core_error_response(err: CoreError) -> Response {
    let status = match &err {
        CoreError::Precondition(_) => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let ids = Arc::new(NetworkIds::new());
    ids.start().await?;
    let state = AppState { ids };

    let app = Router::new()
        .route("/api/status", get(get_status))
        .route("/api/ingest", post(ingest_frame))
        .route("/api/tick", post(run_tick))
        .route("/api/config", post(set_config))
        .route("/api/access/block/:ip", post(block_ip))
        .route("/api/access/allow/:ip", post(allow_ip))
        .route("/api/access/block/:ip", axum::routing::delete(remove_block_ip))
        .route("/api/access/allow/:ip", axum::routing::delete(remove_allow_ip))
        .route("/api/dossier/:ip", get(get_dossier))
        .route("/api/dossier/:ip/notes", post(set_dossier_notes))
        .route("/api/dossier/:ip/classification", post(set_dossier_classification))
        .route("/api/alerts/:id/status", post(set_alert_status))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)),
        )
        .with_state(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!("network-ids-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = {
        let ids = Arc::clone(&state.ids);
        async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            let _ = ids.stop().await;
        }
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Response {
    ApiResponse::ok(StatusCode::OK, state.ids.status().await)
}

async fn ingest_frame(State(state): State<AppState>, body: axum::body::Bytes) -> Response {
    state.ids.ingest(&body).await;
    ApiResponse::ok(StatusCode::OK, ())
}

#[derive(Deserialize)]
struct TickRequest {
    now: f64,
}

async fn run_tick(State(state): State<AppState>, Json(req): Json<TickRequest>) -> Response {
    state.ids.tick(req.now).await;
    ApiResponse::ok(StatusCode::OK, ())
}

async fn set_config(State(state): State<AppState>, Json(options): Json<ConfigOptions>) -> Response {
    state.ids.config_set(options).await;
    ApiResponse::ok(StatusCode::OK, ())
}

fn parse_ip(raw: &str) -> Result<Ipv4Addr, Response> {
    raw.parse().map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("not an IPv4 address: {raw}")))
}

async fn block_ip(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    match state.ids.block(addr).await {
        Ok(()) => ApiResponse::ok(StatusCode::OK, ()),
        Err(err) => core_error_response(err),
    }
}

async fn allow_ip(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    state.ids.allow(addr).await;
    ApiResponse::ok(StatusCode::OK, ())
}

async fn remove_block_ip(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    state.ids.remove_block(addr).await;
    ApiResponse::ok(StatusCode::OK, ())
}

async fn remove_allow_ip(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    state.ids.remove_allow(addr).await;
    ApiResponse::ok(StatusCode::OK, ())
}

async fn get_dossier(State(state): State<AppState>, Path(ip): Path<String>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    match state.ids.dossier(addr).await {
        Some(snapshot) => ApiResponse::ok(StatusCode::OK, snapshot),
        None => error_response(StatusCode::NOT_FOUND, "no such dossier"),
    }
}

#[derive(Deserialize)]
struct NotesRequest {
    text: String,
}

async fn set_dossier_notes(State(state): State<AppState>, Path(ip): Path<String>, Json(req): Json<NotesRequest>) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    match state.ids.set_notes(addr, req.text).await {
        Ok(()) => ApiResponse::ok(StatusCode::OK, ()),
        Err(err) => core_error_response(err),
    }
}

#[derive(Deserialize)]
struct ClassificationRequest {
    classification: Classification,
}

async fn set_dossier_classification(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    Json(req): Json<ClassificationRequest>,
) -> Response {
    let addr = match parse_ip(&ip) {
        Ok(addr) => addr,
        Err(resp) => return resp,
    };
    match state.ids.set_classification(addr, req.classification).await {
        Ok(()) => ApiResponse::ok(StatusCode::OK, ()),
        Err(err) => core_error_response(err),
    }
}

#[derive(Deserialize)]
struct AlertStatusQuery {
    status: AlertStatus,
}

async fn set_alert_status(State(state): State<AppState>, Path(id): Path<String>, Query(query): Query<AlertStatusQuery>) -> Response {
    match state.ids.set_alert_status(&id, query.status).await {
        Ok(()) => ApiResponse::ok(StatusCode::OK, ()),
        Err(err) => core_error_response(err),
    }
}
