// ABOUTME: Integration tests for the HTTP surface driven through the router with tower oneshot.
// ABOUTME: A mock transport stands in for the bridge so lifecycle and send routes are deterministic.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wagate::server::{router, sse_event_name, AppState};
use wagate_core::{Config, SessionEvent, SessionManager, TransportKind, TransportRegistry};
use wagate_transport::backends::mock::MockControl;

const IDENTITY: &str = "5511999999999@s.whatsapp.net";

struct Harness {
    dir: tempfile::TempDir,
    mock: MockControl,
    manager: Arc<SessionManager>,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_api_key(None)
    }

    fn with_api_key(api_key: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.session.data_dir = Some(dir.path().to_string_lossy().to_string());
        config.session.watchdog = false;
        config.server.api_key = api_key.map(str::to_string);

        let mock = MockControl::new();
        let registry = TransportRegistry::new()
            .register("multidevice", mock.factory(TransportKind::MultiDevice))
            .register("webclient", mock.factory(TransportKind::WebClient));
        let manager = Arc::new(SessionManager::new(config, registry).unwrap());
        let app = router(AppState::new(Arc::clone(&manager)), None);

        Self {
            dir,
            mock,
            manager,
            app,
        }
    }

    async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request_with_key(method, uri, body, None).await
    }

    async fn request_with_key(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        api_key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn connect(&self) {
        let (status, _) = self.request("POST", "/api/session/start", None).await;
        assert_eq!(status, StatusCode::OK);
        self.mock.open(IDENTITY);
        settle().await;
        assert!(self.manager.is_ready());
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_status_before_start() {
    let h = Harness::new();

    let (status, body) = h.request("GET", "/api/session/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], false);
    assert_eq!(body["state"], "disconnected");
}

#[tokio::test(start_paused = true)]
async fn test_start_reports_connecting_then_already_active() {
    let h = Harness::new();

    let (status, body) = h.request("POST", "/api/session/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "connecting");

    h.mock.open(IDENTITY);
    settle().await;

    let (_, body) = h.request("POST", "/api/session/start", None).await;
    assert_eq!(body["outcome"], "already_active");
    assert_eq!(h.mock.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_and_logout() {
    let h = Harness::new();
    h.connect().await;

    let (status, body) = h.request("POST", "/api/session/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(!h.manager.is_ready());

    let (status, _) = h.request("POST", "/api/session/logout", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = h.request("GET", "/api/session/status", None).await;
    assert_eq!(body["state"], "logged_out");
}

#[tokio::test(start_paused = true)]
async fn test_restart_accepts_empty_and_json_bodies() {
    let h = Harness::new();
    h.connect().await;

    let (status, body) = h.request("POST", "/api/session/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "completed");

    // inside the restart throttle window
    let (status, body) = h
        .request(
            "POST",
            "/api/session/restart",
            Some(json!({"wipe_credentials": true})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "suppressed");
}

#[tokio::test(start_paused = true)]
async fn test_restart_rejects_malformed_body() {
    let h = Harness::new();

    let request = Request::builder()
        .method("POST")
        .uri("/api/session/restart")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Pairing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_qr_routes() {
    let h = Harness::new();
    let (status, body) = h.request("GET", "/api/session/qr", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    h.request("POST", "/api/session/start", None).await;
    h.mock.pairing_code("2@AbCdEfGhIjKlMnOpQrStUvWxYz0123456789");
    settle().await;

    let (status, body) = h.request("GET", "/api/session/qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["raw_code"], "2@AbCdEfGhIjKlMnOpQrStUvWxYz0123456789");
    assert!(body["data_url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let request = Request::builder()
        .uri("/api/session/qr.png")
        .body(Body::empty())
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
}

// =============================================================================
// Sending
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_before_connect_is_service_unavailable() {
    let h = Harness::new();

    let (status, body) = h
        .request(
            "POST",
            "/api/session/send",
            Some(json!({"to": "11999999999", "body": "hi"})),
        )
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "not_connected");
    assert_eq!(h.mock.send_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_after_connect() {
    let h = Harness::new();
    h.connect().await;

    let (status, body) = h
        .request(
            "POST",
            "/api/session/send",
            Some(json!({"to": "11 98888-7777", "body": "hello"})),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(h.mock.sent()[0].to, "11988887777@s.whatsapp.net");
}

#[tokio::test(start_paused = true)]
async fn test_send_rejects_empty_body() {
    let h = Harness::new();
    h.connect().await;

    let (status, _) = h
        .request(
            "POST",
            "/api/session/send",
            Some(json!({"to": "11999999999", "body": "  "})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.mock.send_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_send_is_bad_gateway() {
    let h = Harness::new();
    h.connect().await;
    h.mock.fail_next_sends(2, "socket hang up");

    let (status, body) = h
        .request(
            "POST",
            "/api/session/send",
            Some(json!({"to": "11999999999", "body": "hello"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "send_failed");
    assert!(body["error"].as_str().unwrap().contains("socket hang up"));
}

#[tokio::test(start_paused = true)]
async fn test_send_media_missing_file_is_bad_request() {
    let h = Harness::new();
    h.connect().await;

    let (status, body) = h
        .request(
            "POST",
            "/api/session/send-media",
            Some(json!({"to": "11999999999", "path": "/nonexistent/photo.jpg"})),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_media");
}

#[tokio::test(start_paused = true)]
async fn test_send_media_with_caption() {
    let h = Harness::new();
    h.connect().await;
    let file = h.dir.path().join("photo.jpg");
    std::fs::write(&file, b"not really a jpeg").unwrap();

    let (status, body) = h
        .request(
            "POST",
            "/api/session/send-media",
            Some(json!({
                "to": "11999999999",
                "path": file.to_string_lossy(),
                "caption": "look"
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    let sent = h.mock.sent();
    let media = sent[0].media.as_ref().unwrap();
    assert_eq!(media.caption.as_deref(), Some("look"));
}

#[tokio::test(start_paused = true)]
async fn test_registered_lookup() {
    let h = Harness::new();
    h.connect().await;
    h.mock.register_number("11988887777@s.whatsapp.net");

    let (status, body) = h
        .request("GET", "/api/session/registered/11988887777", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registered"], true);

    let (_, body) = h
        .request("GET", "/api/session/registered/11000000000", None)
        .await;
    assert_eq!(body["registered"], false);
}

// =============================================================================
// Auth, health, events
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_api_key_required_when_configured() {
    let h = Harness::with_api_key(Some("s3cret"));

    let (status, _) = h.request("GET", "/api/session/status", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h
        .request_with_key("GET", "/api/session/status", None, Some("wrong"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = h
        .request_with_key("GET", "/api/session/status", None, Some("s3cret"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_stats() {
    let h = Harness::new();
    h.connect().await;

    let (status, body) = h.request("GET", "/api/session/health?days=1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"], 1);
    assert!(body["total_events"].as_u64().unwrap() >= 1);
    assert!(body["health_score"].is_number());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_route_is_not_found() {
    let h = Harness::new();
    let (status, _) = h.request("GET", "/api/session/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_sse_event_names() {
    let h = Harness::new();
    let mut events = h.manager.events();
    h.connect().await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(sse_event_name(&event));
        if let SessionEvent::Ready(info) = &event {
            assert_eq!(info.identity.as_deref(), Some(IDENTITY));
        }
    }

    assert!(names.contains(&"wa_ready"));
    assert!(names.contains(&"wa_status"));
}
