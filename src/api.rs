//! HTTP front door for the budget assistant
//!
//! Upload a statement, list the loaded transactions, ask questions as text
//! and fetch a voice room token. Every request is scoped to the session named
//! by the `x-session-id` header; a request without one gets a fresh session.
//! Only uploads register sessions.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::AnalysisRouter;
use crate::config::AppConfig;
use crate::error::AssistantError;
use crate::ingest::{self, Categorizer};
use crate::store::{SessionContext, SessionRegistry};
use crate::voice::TokenIssuer;

pub const SESSION_HEADER: &str = "x-session-id";

const ACCEPTED_EXTENSIONS: [&str; 2] = [".csv", ".txt"];

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub participant: Option<String>,
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionRegistry>,
    pub router: Arc<AnalysisRouter>,
    pub categorizer: Arc<dyn Categorizer>,
    pub tokens: Arc<TokenIssuer>,
    pub max_upload_bytes: usize,
}

impl ApiState {
    pub fn new(
        config: &AppConfig,
        router: Arc<AnalysisRouter>,
        categorizer: Arc<dyn Categorizer>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::with_limits(
                config.session_capacity,
                config.session_idle,
            )),
            router,
            categorizer,
            tokens: Arc::new(TokenIssuer::new(config.livekit.clone())),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// =============================
/// Errors → HTTP
/// =============================

pub enum ApiError {
    Assistant(AssistantError),
    Multipart(MultipartError),
    Json(JsonRejection),
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        ApiError::Assistant(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::Json(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Multipart(err) => {
                (err.status(), serde_json::json!({ "error": err.body_text() }))
            }
            ApiError::Json(err) => {
                (err.status(), serde_json::json!({ "error": err.body_text() }))
            }
            ApiError::Assistant(AssistantError::Validation(err)) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": err.to_string(), "rows": err.rows() }),
            ),
            ApiError::Assistant(err @ (AssistantError::UploadError(_) | AssistantError::Csv(_))) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": err.to_string() }))
            }
            ApiError::Assistant(err) => {
                warn!("Request failed: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": err.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = std::result::Result<Json<serde_json::Value>, ApiError>;

/// =============================
/// Session Ids
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: &str) -> Uuid {
    Uuid::parse_str(value).unwrap_or_else(|_| stable_uuid_from_string(value))
}

/// Session named by the header, or a fresh one when the header is absent.
fn session_id(headers: &HeaderMap) -> Uuid {
    match headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some(value) if !value.is_empty() => parse_or_stable_uuid(value),
        _ => Uuid::new_v4(),
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn read_statement(multipart: &mut Multipart) -> std::result::Result<String, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_lowercase();
        if filename.is_empty() {
            return Err(AssistantError::UploadError("no file selected".to_string()).into());
        }
        if !ACCEPTED_EXTENSIONS.iter().any(|ext| filename.ends_with(ext)) {
            return Err(AssistantError::UploadError(
                "only .csv or .txt files are accepted".to_string(),
            )
            .into());
        }

        let bytes = field.bytes().await?;
        return String::from_utf8(bytes.to_vec()).map_err(|_| {
            AssistantError::UploadError("the file is not UTF-8 text".to_string()).into()
        });
    }

    Err(AssistantError::UploadError("no file part named \"file\"".to_string()).into())
}

async fn upload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult {
    let session_id = session_id(&headers);
    let content = read_statement(&mut multipart).await?;

    let records = ingest::ingest(&content, state.categorizer.as_ref()).await?;
    let session = state.sessions.get_or_create(session_id).await;
    let loaded = session.replace_dataset(records).await?;
    let fingerprint = session.store().fingerprint().await;

    info!(session_id = %session_id, count = loaded.len(), "Statement uploaded");

    Ok(Json(serde_json::json!({
        "message": format!("Loaded {} transactions", loaded.len()),
        "count": loaded.len(),
        "session_id": session_id,
        "fingerprint": fingerprint,
    })))
}

async fn list_transactions(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    let session_id = session_id(&headers);
    let transactions = match state.sessions.get(session_id).await {
        Some(session) => session.store().all().await,
        None => Vec::new(),
    };

    if transactions.is_empty() {
        return Ok(Json(serde_json::json!({
            "transactions": [],
            "message": "No transactions uploaded yet",
        })));
    }

    Ok(Json(serde_json::json!({ "transactions": transactions })))
}

async fn chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "message is empty" })),
        )
            .into_response();
    }

    // Only uploads create sessions; an unknown id is answered from an empty context
    let session_id = session_id(&headers);
    let session = match state.sessions.get(session_id).await {
        Some(session) => session,
        None => Arc::new(SessionContext::new(session_id)),
    };
    let reply = state.router.respond(&session, &req.message).await;
    Json(reply).into_response()
}

async fn livekit_token(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Option<Json<TokenRequest>>,
) -> ApiResult {
    let session_id = session_id(&headers);
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let issued = state.tokens.issue(session_id, req.participant.as_deref())?;
    Ok(Json(serde_json::to_value(issued).map_err(AssistantError::from)?))
}

async fn clear_session(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult {
    let session_id = session_id(&headers);
    let cleared = state.sessions.remove(session_id).await;
    info!(session_id = %session_id, cleared, "Session cleared");

    Ok(Json(serde_json::json!({
        "cleared": cleared,
        "session_id": session_id,
    })))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/api/transactions", get(list_transactions))
        .route("/api/chat", post(chat))
        .route("/api/livekit-token", post(livekit_token))
        .route("/api/clear-session", post(clear_session))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> crate::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RouterConfig;
    use crate::ingest::categorize::RuleCategorizer;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::NaiveDate;
    use tower::ServiceExt;

    const SCENARIO: &str = "Date,Description,Amount,Category\n\
2024-01-05,Coffee Shop,-4.50,Food\n\
2024-01-20,Paycheck,2000,Income\n";

    const BOUNDARY: &str = "budget-test-boundary";

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        AppConfig::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    fn state_with(config: &AppConfig) -> ApiState {
        let router = AnalysisRouter::with_rules(RouterConfig {
            reference_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            ..RouterConfig::default()
        });
        ApiState::new(config, Arc::new(router), Arc::new(RuleCategorizer))
    }

    fn app_with(config: &AppConfig) -> Router {
        create_router(state_with(config))
    }

    fn app() -> Router {
        app_with(&config(&[]))
    }

    fn upload_request(session: &str, filename: &str, content: &str) -> Request<Body> {
        let mut request = anonymous_upload(filename, content);
        request
            .headers_mut()
            .insert(SESSION_HEADER, session.parse().unwrap());
        request
    }

    fn anonymous_upload(filename: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
Content-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
            b = BOUNDARY,
            f = filename,
            c = content,
        );
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, session: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(SESSION_HEADER, session)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str, session: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(SESSION_HEADER, session)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), get_request("/health", "s1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_upload_then_ask() {
        let app = app();

        let (status, body) = send(&app, upload_request("s1", "statement.csv", SCENARIO)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["session_id"], stable_uuid_from_string("s1").to_string());
        assert!(!body["fingerprint"].as_str().unwrap().is_empty());

        let (_, body) = send(&app, get_request("/api/transactions", "s1")).await;
        let rows = body["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Description"], "Coffee Shop");
        assert_eq!(rows[0]["Category"], "Food");

        let ask = serde_json::json!({ "message": "how much did I spend on Food in January" });
        let (status, body) = send(&app, json_request("POST", "/api/chat", "s1", ask)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "answer");
        assert!(body["text"].as_str().unwrap().contains("$4.50"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let app = app();
        send(&app, upload_request("alice", "a.csv", SCENARIO)).await;

        let (_, body) = send(&app, get_request("/api/transactions", "bob")).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 0);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_upload_rejects_extension() {
        let (status, body) = send(&app(), upload_request("s1", "statement.pdf", SCENARIO)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains(".csv"));
    }

    #[tokio::test]
    async fn test_upload_reports_bad_rows() {
        let content = "Date,Description,Amount\n2024-01-05,Coffee,-4.50\nnot a date,Tea,-2.00\n";
        let (status, body) = send(&app(), upload_request("s1", "bad.csv", content)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["rows"], serde_json::json!([2]));
    }

    #[tokio::test]
    async fn test_upload_over_limit() {
        let app = app_with(&config(&[("MAX_UPLOAD_BYTES", "64")]));
        let content = SCENARIO.repeat(10);
        let (status, _) = send(&app, upload_request("s1", "big.csv", &content)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_message() {
        let ask = serde_json::json!({ "message": "  " });
        let (status, _) = send(&app(), json_request("POST", "/api/chat", "s1", ask)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_token_requires_credentials() {
        let request = json_request("POST", "/api/livekit-token", "s1", serde_json::json!({}));
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_token_room_is_per_session() {
        let app = app_with(&config(&[
            ("LIVEKIT_URL", "wss://voice.example.test"),
            ("LIVEKIT_API_KEY", "devkey"),
            ("LIVEKIT_API_SECRET", "a-secret-that-is-long-enough-for-hmac"),
        ]));
        let session = Uuid::new_v4().to_string();

        let request = json_request(
            "POST",
            "/api/livekit-token",
            &session,
            serde_json::json!({ "participant": "sam" }),
        );
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["room"], format!("budget-planner-{}", session));
        assert_eq!(body["participant"], "sam");
        assert!(!body["token"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_session() {
        let app = app();
        send(&app, upload_request("s1", "statement.csv", SCENARIO)).await;

        let (status, body) = send(
            &app,
            json_request("POST", "/api/clear-session", "s1", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cleared"], true);

        let (_, body) = send(&app, get_request("/api/transactions", "s1")).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_headerless_uploads_get_separate_sessions() {
        let app = app();

        let (status, first) = send(&app, anonymous_upload("a.csv", SCENARIO)).await;
        assert_eq!(status, StatusCode::OK);
        let other = "Date,Description,Amount\n2024-02-01,Bakery,-3.00\n";
        let (_, second) = send(&app, anonymous_upload("b.csv", other)).await;

        let first_id = first["session_id"].as_str().unwrap().to_string();
        let second_id = second["session_id"].as_str().unwrap().to_string();
        assert_ne!(first_id, second_id);

        let (_, body) = send(&app, get_request("/api/transactions", &first_id)).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);
        let (_, body) = send(&app, get_request("/api/transactions", &second_id)).await;
        let rows = body["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Description"], "Bakery");
    }

    #[tokio::test]
    async fn test_chat_does_not_create_sessions() {
        let state = state_with(&config(&[]));
        let app = create_router(state.clone());

        for n in 0..3 {
            let session = format!("invented-{}", n);
            let ask = serde_json::json!({ "message": "how much did I spend" });
            let (status, body) = send(&app, json_request("POST", "/api/chat", &session, ask)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["kind"], "no_data");

            let (_, body) = send(&app, get_request("/api/transactions", &session)).await;
            assert_eq!(body["transactions"].as_array().unwrap().len(), 0);
        }
        assert!(state.sessions.is_empty().await);

        send(&app, upload_request("real", "statement.csv", SCENARIO)).await;
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_upload_sessions_are_bounded() {
        let state = state_with(&config(&[("SESSION_CAPACITY", "2")]));
        let app = create_router(state.clone());

        for n in 0..5 {
            let session = format!("device-{}", n);
            let (status, _) = send(&app, upload_request(&session, "statement.csv", SCENARIO)).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(state.sessions.len().await, 2);
    }

    #[tokio::test]
    async fn test_chat_malformed_body_is_json_error() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(SESSION_HEADER, "s1")
            .header("content-type", "application/json")
            .body(Body::from("{\"message\": "))
            .unwrap();
        let (status, body) = send(&app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_header_only_upload_keeps_previous_data() {
        let app = app();
        send(&app, upload_request("s1", "statement.csv", SCENARIO)).await;

        let (status, body) = send(&app, upload_request("s1", "empty.csv", "Date,Description,Amount\n")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("no transactions"));

        let (_, body) = send(&app, get_request("/api/transactions", "s1")).await;
        assert_eq!(body["transactions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_session_id_parsing() {
        let id = Uuid::new_v4();
        assert_eq!(parse_or_stable_uuid(&id.to_string()), id);
        assert_eq!(
            parse_or_stable_uuid("kitchen-tablet"),
            stable_uuid_from_string("kitchen-tablet")
        );

        let mut headers = HeaderMap::new();
        assert_ne!(session_id(&headers), session_id(&headers));
        headers.insert(SESSION_HEADER, "kitchen-tablet".parse().unwrap());
        assert_eq!(session_id(&headers), session_id(&headers));
    }
}
