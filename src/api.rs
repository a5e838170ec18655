//! HTTP/SSE API for the homepage chatbot.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_stream::stream;
use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::core::engine::{ConversationEngine, TurnStream};
use crate::core::events::TurnEvent;
use crate::logging;
use crate::rate_limit::{RateLimiter, client_ip};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const SERVICE_BANNER: &str = "Dingkang Wang Chatbot API";

#[derive(Clone)]
pub struct AppState {
    engine: ConversationEngine,
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: ConversationEngine, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            engine,
            rate_limiter,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiOptions {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    session_id: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
}

/// Start the chat API server and run until Ctrl-C or SIGTERM.
pub async fn run_http_server(
    state: AppState,
    allowed_origins: &[String],
    options: ApiOptions,
) -> Result<()> {
    if options.port == 0 {
        bail!("Port must be > 0");
    }

    let app = build_router(state, allowed_origins);
    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .with_context(|| format!("Invalid bind address '{}:{}'", options.host, options.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    logging::info(format!("Chat API listening on http://{addr}"));
    logging::info(format!("Allowed origins: {}", allowed_origins.join(", ")));

    let shutdown = CancellationToken::new();
    let signal_handle = tokio::spawn(cancel_on_signal(shutdown.clone()));
    let serve_result = serve(listener, app, shutdown).await;
    signal_handle.abort();
    serve_result
}

/// Serve `app` on an already bound listener until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| anyhow!("Chat API server error: {e}"))
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            logging::warn(format!("Failed to listen for Ctrl-C: {err}"));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                logging::warn(format!("Failed to listen for SIGTERM: {err}"));
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    logging::info("Shutdown signal received, draining connections");
    shutdown.cancel();
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: SERVICE_BANNER,
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&headers, peer);

    if !state.rate_limiter.admit(&ip) {
        logging::warn(format!(
            "Rate limit exceeded for {ip} ({} clients tracked)",
            state.rate_limiter.tracked_clients()
        ));
        return Err(ApiError::too_many_requests(format!(
            "Rate limit exceeded. Maximum {} requests per minute.",
            state.rate_limiter.capacity()
        )));
    }
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("message is required"));
    }
    if req.session_id.trim().is_empty() {
        return Err(ApiError::bad_request("session_id is required"));
    }

    logging::info(format!(
        "Chat request from {ip} (session {})",
        req.session_id
    ));
    let turn = state.engine.handle_turn(req.message, req.session_id);
    let sse = Sse::new(sse_events(turn)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keepalive"),
    );
    Ok(([("x-accel-buffering", "no")], sse).into_response())
}

/// Frame a turn as SSE data events, always closing with `done`.
fn sse_events(mut turn: TurnStream) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    stream! {
        while let Some(event) = turn.next().await {
            yield Ok(sse_data(&turn_event_payload(&event)));
        }
        yield Ok(sse_data(&json!({ "type": "done" })));
    }
}

fn turn_event_payload(event: &TurnEvent) -> Value {
    match event {
        TurnEvent::Text(content) => json!({ "type": "text", "content": content }),
        TurnEvent::Error(content) => json!({ "type": "error", "content": content }),
    }
}

fn sse_data(payload: &Value) -> SseEvent {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().data(data)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_origin = if allowed_origins.iter().any(|origin| origin == "*") {
        // credentials rule out a literal wildcard; echo the caller instead
        AllowOrigin::mirror_request()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    logging::warn(format!("Ignoring invalid CORS origin '{origin}'"));
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

#[derive(Debug, Clone)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn too_many_requests(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "message": self.message,
                    "status": self.status.as_u16(),
                }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::EngineConfig;
    use crate::llm_client::LlmError;
    use crate::session::SessionStore;
    use crate::test_support::{Script, ScriptedClient, text_reply, tool_reply};
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    const ORIGIN: &str = "http://localhost:3000";

    fn test_state(scripts: Vec<Script>, capacity: usize) -> AppState {
        let engine = ConversationEngine::new(
            Arc::new(ScriptedClient::new(scripts)),
            Arc::new(SessionStore::default()),
            "test prompt",
            EngineConfig::default(),
        );
        AppState::new(engine, Arc::new(RateLimiter::new(capacity)))
    }

    async fn spawn_test_server(
        state: AppState,
    ) -> Result<Option<(SocketAddr, CancellationToken)>> {
        let app = build_router(state, &[ORIGIN.to_string()]);
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, app, shutdown.clone()));
        Ok(Some((addr, shutdown)))
    }

    fn data_payloads(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    async fn render(events: Vec<TurnEvent>) -> Vec<Value> {
        let turn: TurnStream = Box::pin(stream::iter(events));
        let response = Sse::new(sse_events(turn)).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        data_payloads(&String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn sse_stream_always_ends_with_single_done() {
        let outcomes = vec![
            vec![TurnEvent::Text("Hi".to_string())],
            vec![TurnEvent::provider_error(&LlmError::NetworkError(
                "connection reset".to_string(),
            ))],
            vec![
                TurnEvent::Text("partial".to_string()),
                TurnEvent::unexpected("boom"),
            ],
            vec![],
        ];
        for events in outcomes {
            let payloads = render(events).await;
            let done = payloads
                .iter()
                .filter(|payload| payload["type"] == "done")
                .count();
            assert_eq!(done, 1);
            assert_eq!(payloads.last(), Some(&json!({ "type": "done" })));
        }
    }

    #[tokio::test]
    async fn sse_payloads_carry_text_and_errors() {
        let payloads = render(vec![
            TurnEvent::Text("Hello".to_string()),
            TurnEvent::unexpected("boom"),
        ])
        .await;
        assert_eq!(
            payloads,
            vec![
                json!({ "type": "text", "content": "Hello" }),
                json!({ "type": "error", "content": "\n\n[Unexpected error: boom]" }),
                json!({ "type": "done" }),
            ]
        );
    }

    #[tokio::test]
    async fn health_and_root_respond() -> Result<()> {
        let Some((addr, shutdown)) = spawn_test_server(test_state(vec![], 10)).await? else {
            return Ok(());
        };
        let client = reqwest::Client::new();

        let health: Value = client
            .get(format!("http://{addr}/health"))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(health, json!({ "status": "ok" }));

        let root: Value = client
            .get(format!("http://{addr}/"))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(root, json!({ "message": "Dingkang Wang Chatbot API" }));

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn chat_streams_scripted_turn() -> Result<()> {
        let state = test_state(
            vec![
                Script::Events(tool_reply("toolu_01", "get_github_repos", &[])),
                Script::Events(text_reply(&["Dingkang has 7 ", "public repositories..."])),
            ],
            10,
        );
        let Some((addr, shutdown)) = spawn_test_server(state).await? else {
            return Ok(());
        };

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/chat"))
            .json(&json!({
                "message": "What are Dingkang's GitHub projects?",
                "session_id": "visitor-1"
            }))
            .send()
            .await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(
            response
                .headers()
                .get("x-accel-buffering")
                .and_then(|v| v.to_str().ok()),
            Some("no")
        );

        let payloads = data_payloads(&response.text().await?);
        assert_eq!(
            payloads,
            vec![
                json!({ "type": "text", "content": "Dingkang has 7 " }),
                json!({ "type": "text", "content": "public repositories..." }),
                json!({ "type": "done" }),
            ]
        );

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn provider_failure_is_reported_inline() -> Result<()> {
        let state = test_state(
            vec![Script::OpenError(LlmError::RateLimited {
                message: "slow down".to_string(),
                retry_after: None,
            })],
            10,
        );
        let Some((addr, shutdown)) = spawn_test_server(state).await? else {
            return Ok(());
        };

        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/chat"))
            .json(&json!({ "message": "hi", "session_id": "visitor-2" }))
            .send()
            .await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let payloads = data_payloads(&response.text().await?);
        assert_eq!(
            payloads,
            vec![
                json!({
                    "type": "error",
                    "content": "\n\n[Error communicating with AI service: rate limited: slow down]"
                }),
                json!({ "type": "done" }),
            ]
        );

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn blank_fields_and_rate_limit_are_rejected() -> Result<()> {
        let Some((addr, shutdown)) = spawn_test_server(test_state(vec![], 1)).await? else {
            return Ok(());
        };
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/api/chat");

        let blank = client
            .post(&url)
            .json(&json!({ "message": "   ", "session_id": "s" }))
            .send()
            .await?;
        assert_eq!(blank.status(), reqwest::StatusCode::BAD_REQUEST);

        let limited = client
            .post(&url)
            .json(&json!({ "message": "hi", "session_id": "s" }))
            .send()
            .await?;
        assert_eq!(limited.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
        let body: Value = limited.json().await?;
        assert_eq!(
            body,
            json!({
                "error": {
                    "message": "Rate limit exceeded. Maximum 1 requests per minute.",
                    "status": 429
                }
            })
        );

        // a different forwarded client still has budget
        let other = client
            .post(&url)
            .header("x-forwarded-for", "203.0.113.9")
            .json(&json!({ "message": "", "session_id": "s" }))
            .send()
            .await?;
        assert_eq!(other.status(), reqwest::StatusCode::BAD_REQUEST);

        shutdown.cancel();
        Ok(())
    }

    #[tokio::test]
    async fn cors_preflight_allows_configured_origin() -> Result<()> {
        let Some((addr, shutdown)) = spawn_test_server(test_state(vec![], 10)).await? else {
            return Ok(());
        };

        let response = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("http://{addr}/api/chat"))
            .header("origin", ORIGIN)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .send()
            .await?;
        let headers = response.headers();
        assert_eq!(
            headers
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some(ORIGIN)
        );
        assert_eq!(
            headers
                .get("access-control-allow-credentials")
                .and_then(|v| v.to_str().ok()),
            Some("true")
        );

        shutdown.cancel();
        Ok(())
    }
}
