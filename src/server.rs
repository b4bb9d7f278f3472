// ABOUTME: HTTP surface over the SessionManager - lifecycle, pairing, sends and an SSE event feed.
// ABOUTME: Mounted under /api/session with optional x-api-key auth; /metrics renders Prometheus text.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::trace::TraceLayer;
use wagate_core::{ReinitOutcome, SessionError, SessionEvent, SessionManager};

const API_KEY_HEADER: &str = "x-api-key";
const SSE_KEEPALIVE: Duration = Duration::from_secs(15);
const DEFAULT_HEALTH_DAYS: u32 = 7;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        let api_key = manager.config().server.api_key.clone();
        Self { manager, api_key }
    }
}

// =============================================================================
// Request / response bodies
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RestartRequest {
    #[serde(default)]
    pub wipe_credentials: bool,
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ReinitOutcome> for RestartResponse {
    fn from(outcome: ReinitOutcome) -> Self {
        let label = outcome.label();
        match outcome {
            ReinitOutcome::Completed { transport } => Self {
                outcome: label,
                transport: Some(transport.to_string()),
                error: None,
            },
            ReinitOutcome::Failed { error } => Self {
                outcome: label,
                transport: None,
                error: Some(error.to_string()),
            },
            ReinitOutcome::Suppressed | ReinitOutcome::Superseded => Self {
                outcome: label,
                transport: None,
                error: None,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub raw_code: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub data_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMediaRequest {
    pub to: String,
    pub path: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisteredResponse {
    pub number: String,
    pub registered: bool,
}

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub days: Option<u32>,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    kind: &'static str,
    error: String,
}

/// Maps session and infrastructure failures onto HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Session(SessionError),
    NotFound(&'static str),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError::Session(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotConnected | SessionError::TransportUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::SendFailed { .. } => StatusCode::BAD_GATEWAY,
        SessionError::InvalidMedia(_) => StatusCode::BAD_REQUEST,
        SessionError::SessionInvalid | SessionError::PairingTimeout => StatusCode::UNAUTHORIZED,
        SessionError::Conflict => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, error) = match self {
            ApiError::Session(err) => (status_for(&err), err.kind(), err.to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", what.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Internal(err) => {
                tracing::error!(error = %format!("{:#}", err), "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
            }
        };
        let body = ErrorBody {
            success: false,
            kind,
            error,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// =============================================================================
// Router
// =============================================================================

/// Build the application router. `metrics` is optional so tests can skip
/// installing the global recorder.
pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let session_routes = Router::new()
        .route("/status", get(status_handler))
        .route("/start", post(start_handler))
        .route("/stop", post(stop_handler))
        .route("/logout", post(logout_handler))
        .route("/restart", post(restart_handler))
        .route("/qr", get(qr_handler))
        .route("/qr.png", get(qr_png_handler))
        .route("/send", post(send_handler))
        .route("/send-media", post(send_media_handler))
        .route("/registered/{number}", get(registered_handler))
        .route("/events", get(events_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state);

    let mut app = Router::new().nest("/api/session", session_routes);

    if let Some(handle) = metrics {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(Arc::new(handle));
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(manager: Arc<SessionManager>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle =
        wagate_core::metrics::init_metrics().context("Failed to initialize Prometheus metrics")?;

    let addr = format!(
        "{}:{}",
        manager.config().server.host,
        manager.config().server.port
    );
    let app = router(AppState::new(manager), Some(metrics_handle));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, StatusCode> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "Rejected request with missing or invalid API key");
        wagate_core::metrics::record_error("api_auth");
        Err(StatusCode::UNAUTHORIZED)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.manager.runtime_status())
}

async fn start_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let outcome = state.manager.start_session().await?;
    Ok(Json(outcome))
}

async fn stop_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.manager.stop_session().await;
    ActionResponse::ok("session stopped")
}

async fn logout_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.manager.force_logout().await;
    ActionResponse::ok("logged out; credentials wiped")
}

async fn restart_handler(State(state): State<AppState>, body: Bytes) -> ApiResult<impl IntoResponse> {
    // An empty body means a plain restart
    let request: RestartRequest = if body.is_empty() {
        RestartRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    tracing::info!(wipe_credentials = request.wipe_credentials, "Operator restart requested");
    let outcome = state.manager.restart_session(request.wipe_credentials).await;
    Ok(Json(RestartResponse::from(outcome)))
}

async fn qr_handler(State(state): State<AppState>) -> ApiResult<Json<QrResponse>> {
    let qr = state
        .manager
        .latest_qr()
        .ok_or(ApiError::NotFound("no pairing code available"))?;
    Ok(Json(QrResponse {
        raw_code: qr.raw_code.clone(),
        issued_at: qr.issued_at,
        data_url: qr.data_url(),
    }))
}

async fn qr_png_handler(State(state): State<AppState>) -> ApiResult<Response> {
    let qr = state
        .manager
        .latest_qr()
        .ok_or(ApiError::NotFound("no pairing code available"))?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        qr.image.clone(),
    )
        .into_response())
}

async fn send_handler(
    State(state): State<AppState>,
    Json(payload): Json<SendRequest>,
) -> ApiResult<impl IntoResponse> {
    if payload.body.trim().is_empty() {
        return Err(ApiError::BadRequest("body cannot be empty".to_string()));
    }
    let result = state.manager.send_message(&payload.to, &payload.body).await?;
    Ok(Json(result))
}

async fn send_media_handler(
    State(state): State<AppState>,
    Json(payload): Json<SendMediaRequest>,
) -> ApiResult<impl IntoResponse> {
    let path = std::path::PathBuf::from(&payload.path);
    let result = state
        .manager
        .send_media(&payload.to, &path, payload.caption.as_deref())
        .await?;
    Ok(Json(result))
}

async fn registered_handler(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> ApiResult<Json<RegisteredResponse>> {
    let registered = state.manager.is_registered(&number).await?;
    Ok(Json(RegisteredResponse { number, registered }))
}

async fn health_handler(
    State(state): State<AppState>,
    Query(query): Query<HealthQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = query.days.unwrap_or(DEFAULT_HEALTH_DAYS);
    let stats = state
        .manager
        .health_stats(days)?
        .ok_or(ApiError::NotFound("health log is disabled"))?;
    Ok(Json(stats))
}

/// SSE event name for a session broadcast
pub fn sse_event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Qr(_) => "wa_qr",
        SessionEvent::Ready(_) => "wa_ready",
        SessionEvent::Message(_) => "wa_message",
        SessionEvent::Status(_) => "wa_status",
    }
}

async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.manager.events()).filter_map(|item| async move {
        match item {
            Ok(event) => match Event::default().event(sse_event_name(&event)).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode session event");
                    None
                }
            },
            Err(e) => {
                // Slow subscribers skip what they missed
                tracing::debug!(error = %e, "SSE subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE))
}

async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&SessionError::NotConnected), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&SessionError::TransportUnavailable("none".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SessionError::SendFailed {
                attempts: 2,
                message: "boom".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&SessionError::InvalidMedia("missing".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_restart_response_from_outcome() {
        let resp = RestartResponse::from(ReinitOutcome::Failed {
            error: SessionError::NotConnected,
        });
        assert_eq!(resp.outcome, "failed");
        assert_eq!(resp.error.as_deref(), Some("session is not connected"));
        assert!(resp.transport.is_none());

        let resp = RestartResponse::from(ReinitOutcome::Suppressed);
        assert_eq!(resp.outcome, "suppressed");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("error").is_none());
    }
}
