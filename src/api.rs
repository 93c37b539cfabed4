use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{self, ApiError};
use crate::registry::{ParticipantRecord, Registry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─── AppState ───────────────────────────────────────────────────────────────

pub struct AppState {
    pub registry: Registry,
}

// ---------------------------------------------------------------------------
// Request / Response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub uid: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<ParticipantRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LeaveRequest {
    #[serde(default)]
    pub uid: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// POST /token: register a participant and sign a join token
// ---------------------------------------------------------------------------

pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TokenRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(body) = body?;
    let channel = body.channel_name.unwrap_or_default();
    let user = body.user_name.unwrap_or_default();

    let grant = state.registry.issue_token(&channel, &user).await?;

    Ok(Json(TokenResponse {
        token: grant.token,
        uid: grant.uid,
    }))
}

// ---------------------------------------------------------------------------
// GET /users/:channel_name: current members of a channel
// ---------------------------------------------------------------------------

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Path(channel_name): Path<String>,
) -> Result<Json<UsersResponse>, ApiError> {
    let users = state.registry.list_participants(&channel_name).await?;
    Ok(Json(UsersResponse { users }))
}

// ---------------------------------------------------------------------------
// POST /leave: forget a participant (idempotent)
// ---------------------------------------------------------------------------

pub async fn leave(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LeaveRequest>, JsonRejection>,
) -> Result<Json<LeaveResponse>, ApiError> {
    let Json(body) = body?;
    let uid = body
        .uid
        .ok_or_else(|| ApiError::validation("User ID is required"))?;

    if state.registry.remove_participant(uid).await.is_none() {
        debug!(uid, "leave for unknown participant");
    }

    Ok(Json(LeaveResponse { success: true }))
}

// ---------------------------------------------------------------------------
// GET /debug/users: dump the whole store
// ---------------------------------------------------------------------------

pub async fn debug_users(State(state): State<Arc<AppState>>) -> Json<UsersResponse> {
    let users = state.registry.all_participants().await;
    debug!(count = users.len(), "debug dump of all participants");
    Json(UsersResponse { users })
}

// ─── Health endpoint ────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let participants = state.registry.store().len().await;

    Json(serde_json::json!({
        "status": "ok",
        "version": VERSION,
        "participants": participants,
    }))
}

// ─── Version header middleware ──────────────────────────────────────────────

async fn version_header_middleware(request: Request, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        HeaderName::from_static("x-huddle-version"),
        HeaderValue::from_static(VERSION),
    );
    response
}

// ─── CORS configuration ────────────────────────────────────────────────────

pub fn build_cors_layer(allowed_origins: &str) -> CorsLayer {
    if allowed_origins == "*" {
        warn!("CORS: permissive mode (allow all origins)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("CORS: ignoring invalid origin {s:?}");
                None
            }
        })
        .collect();

    info!("CORS: restricted to {} origin(s)", origins.len());

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([HeaderName::from_static("content-type")])
}

// ─── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/token", post(issue_token))
        .route("/users/:channel_name", get(list_users))
        .route("/leave", post(leave))
        .route("/debug/users", get(debug_users))
        .layer(middleware::from_fn(version_header_middleware))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{JwtTokenSigner, Role};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    fn app() -> (Router, Arc<JwtTokenSigner>) {
        let signer = Arc::new(JwtTokenSigner::new("app", "cert"));
        let state = Arc::new(AppState {
            registry: Registry::new(signer.clone()),
        });
        (router(state, CorsLayer::permissive()), signer)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        axum::http::Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn join(app: &Router, channel: &str, user: &str) -> u32 {
        let (status, body) = send(
            app,
            post_json(
                "/token",
                serde_json::json!({ "channelName": channel, "userName": user }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["uid"].as_u64().unwrap() as u32
    }

    #[tokio::test]
    async fn token_issues_publisher_token() {
        let (app, signer) = app();
        let (status, body) = send(
            &app,
            post_json(
                "/token",
                serde_json::json!({ "channelName": "room1", "userName": "Alice" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let claims = signer.verify(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(claims.channel, "room1");
        assert_eq!(claims.role, Role::Publisher);
        assert_eq!(u64::from(claims.uid), body["uid"].as_u64().unwrap());
    }

    #[tokio::test]
    async fn token_requires_both_fields() {
        let (app, _) = app();

        let (status, body) = send(
            &app,
            post_json("/token", serde_json::json!({ "channelName": "room1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(
            body["error"]["message"],
            "Channel name and user name are required"
        );

        let (status, _) = send(
            &app,
            post_json(
                "/token",
                serde_json::json!({ "channelName": "", "userName": "Alice" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (app, _) = app();
        let req = axum::http::Request::post("/token")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn users_lists_channel_members() {
        let (app, _) = app();
        let alice = join(&app, "room1", "Alice").await;
        join(&app, "room2", "Carol").await;

        let (status, body) = send(&app, get_req("/users/room1")).await;
        assert_eq!(status, StatusCode::OK);

        let users = body["users"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["uid"].as_u64().unwrap() as u32, alice);
        assert_eq!(users[0]["userName"], "Alice");
        assert_eq!(users[0]["channelName"], "room1");
        assert!(users[0]["timestamp"].as_i64().unwrap() > 0);

        let (_, body) = send(&app, get_req("/users/empty-room")).await;
        assert!(body["users"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn leave_removes_and_is_idempotent() {
        let (app, _) = app();
        let alice = join(&app, "room1", "Alice").await;
        let bob = join(&app, "room1", "Bob").await;

        for _ in 0..2 {
            let (status, body) =
                send(&app, post_json("/leave", serde_json::json!({ "uid": alice }))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
        }

        let (_, body) = send(&app, get_req("/users/room1")).await;
        let users = body["users"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["uid"].as_u64().unwrap() as u32, bob);
    }

    #[tokio::test]
    async fn leave_requires_uid() {
        let (app, _) = app();
        let (status, body) = send(&app, post_json("/leave", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "User ID is required");
    }

    #[tokio::test]
    async fn debug_dumps_every_channel() {
        let (app, _) = app();
        join(&app, "room1", "Alice").await;
        join(&app, "room2", "Carol").await;

        let (status, body) = send(&app, get_req("/debug/users")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn health_reports_version_header() {
        let (app, _) = app();
        join(&app, "room1", "Alice").await;

        let response = app.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-huddle-version"], VERSION);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["participants"], 1);
    }

    #[test]
    fn cors_skips_invalid_origins() {
        // Builds without panicking on a bad entry.
        let _ = build_cors_layer("https://a.example, bad\norigin ,https://b.example");
    }
}
