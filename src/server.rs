//!
//! minco HTTP server
//! -----------------
//! Axum router for the `/api/v1` surface.
//!
//! Responsibilities:
//! - Password login that answers with a bearer token and an `auth_token` cookie.
//! - Authentication and admin gates as route layers in front of protected routes.
//! - Task endpoints scoped to the authenticated subject.
//! - Admin user listing and status changes.
//! - Request logging and permissive CORS around everything.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{require_admin, require_auth, AuthGate, AuthResponse, AuthService, LoginRequest, Session, TokenCodec};
use crate::security::{InMemoryUserDirectory, User, UserDirectory, STATUS_ACTIVE, STATUS_DISABLED};
use crate::tasks::{Task, TaskCreate, TaskList, TaskQuery, TaskStore};

pub mod logging;
pub mod response;

use logging::log_requests;
use response::ApiResponse;

pub const AUTH_COOKIE: &str = "auth_token";
pub const API_PREFIX: &str = "/api/v1";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gate: AuthGate,
    pub auth: AuthService,
    pub users: Arc<dyn UserDirectory>,
    pub tasks: Arc<TaskStore>,
}

impl AppState {
    /// Builds the token codec once and hands it to both the gate and the login service.
    pub fn new(config: ServerConfig, users: Arc<dyn UserDirectory>) -> Self {
        let codec = Arc::new(TokenCodec::new(config.jwt.clone()));
        Self {
            gate: AuthGate::new(codec.clone(), users.clone()),
            auth: AuthService::new(codec, users.clone()),
            users,
            tasks: Arc::new(TaskStore::new()),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new().route("/auth/login", post(login));

    let authenticated = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{task_id}", get(get_task))
        .route("/tasks/{task_id}/complete", put(complete_task))
        .route_layer(from_fn_with_state(state.gate.clone(), require_auth));

    let admin = Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/{user_id}/status", put(set_user_status))
        .route_layer(from_fn_with_state(state.gate.clone(), require_admin));

    Router::new()
        .route("/health", get(|| async { "minco ok" }))
        .nest(API_PREFIX, public.merge(authenticated).merge(admin))
        .layer(from_fn(log_requests))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Start the HTTP server on `0.0.0.0:<http_port>`.
///
/// Seeds the in-memory user directory with the `admin` account before binding.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    if config.jwt.is_dev_secret() {
        warn!("using the built-in development JWT secret; set MINCO_JWT_SECRET for any shared deployment");
    }
    let users = Arc::new(InMemoryUserDirectory::new());
    users.ensure_default_admin(&config.admin_password)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let app = router(AppState::new(config, users));

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn auth_cookie(config: &ServerConfig, token: &str) -> AppResult<HeaderValue> {
    let mut cookie = format!("{}={}; Max-Age={}; Path=/; HttpOnly", AUTH_COOKIE, token, config.jwt.expires_in_secs);
    if let Some(domain) = &config.cookie_domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    HeaderValue::from_str(&cookie).map_err(|e| AppError::internal("bad_cookie".to_string(), e.to_string()))
}

fn session_user_id(session: &Session) -> AppResult<i64> {
    session
        .subject_id()
        .ok_or_else(|| AppError::auth("invalid_token", "Invalid token or expired token."))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(req) = payload?;
    let auth: AuthResponse = state.auth.login(&req.username, &req.password).await?;
    let cookie = auth_cookie(&state.config, &auth.access_token)?;
    let mut resp = ApiResponse::ok(auth).into_response();
    resp.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(resp)
}

async fn logout(State(state): State<AppState>, Extension(mut session): Extension<Session>) -> ApiResponse<Vec<Value>> {
    state.auth.logout(&mut session);
    ApiResponse::ok(Vec::new())
}

async fn me(State(state): State<AppState>, Extension(session): Extension<Session>) -> AppResult<ApiResponse<Value>> {
    let user = state.auth.current_user(&session).await?;
    let (jti, user_claims) = match session.current_claims() {
        Some(c) => (json!(c.jti), json!(c.user_claims)),
        None => (Value::Null, json!({})),
    };
    Ok(ApiResponse::ok(json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "full_name": user.full_name,
        "status": user.status,
        "created_at": user.created_at,
        "jti": jti,
        "user_claims": user_claims,
    })))
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> AppResult<ApiResponse<TaskList>> {
    let user_id = session_user_id(&session)?;
    let Query(q) = query.map_err(|rej| AppError::validation("invalid_query".to_string(), rej.body_text()))?;
    Ok(ApiResponse::ok(state.tasks.list_tasks(user_id, &q)))
}

async fn create_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    payload: Result<Json<TaskCreate>, JsonRejection>,
) -> AppResult<ApiResponse<Task>> {
    let user_id = session_user_id(&session)?;
    let Json(data) = payload?;
    if data.title.trim().is_empty() {
        return Err(AppError::user("empty_title", "Task title must not be empty."));
    }
    Ok(ApiResponse::ok(state.tasks.create_task(user_id, data)))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(task_id): Path<String>,
) -> AppResult<ApiResponse<Task>> {
    let user_id = session_user_id(&session)?;
    state
        .tasks
        .get_task(user_id, &task_id)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::not_found("task_not_found", "Task not found."))
}

async fn complete_task(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(task_id): Path<String>,
) -> AppResult<ApiResponse<Task>> {
    let user_id = session_user_id(&session)?;
    state
        .tasks
        .complete_task(user_id, &task_id)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::not_found("task_not_found", "Task not found."))
}

async fn list_users(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<User>>> {
    Ok(ApiResponse::ok(state.users.list_users().await?))
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    status: i32,
}

async fn set_user_status(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(user_id): Path<i64>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> AppResult<ApiResponse<User>> {
    let Json(update) = payload?;
    if update.status != STATUS_ACTIVE && update.status != STATUS_DISABLED {
        return Err(AppError::user("invalid_status", "Status must be 0 (disabled) or 1 (active)."));
    }
    let user = state
        .users
        .set_status(user_id, update.status)
        .await?
        .ok_or_else(|| AppError::not_found("user_not_found", "User not found."))?;
    info!(admin_id = ?session.subject_id(), user_id, status = update.status, "user status changed");
    Ok(ApiResponse::ok(user))
}
