//! REST routes under `/api/v1.0`.
//!
//! # Responsibility
//! - Decode requests, call `MessageService`, encode JSON responses.
//! - Scope every request to a child of the server root context with a timeout.
//!
//! # Invariants
//! - Not-found is a 404 response, never an empty 200.
//! - Error bodies are always `{"error": <code>, "message": <text>}`.
//! - Request logs carry ids and status only; message content is never logged.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use discussion_core::{
    core_version, Context, Message, MessageId, MessageService, NewsId, RepoError,
    TableMessageRepository,
};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const API_PREFIX: &str = "/api/v1.0";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<MessageService<TableMessageRepository>>,
    root: Context,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        service: MessageService<TableMessageRepository>,
        root: Context,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service: Arc::new(service),
            root,
            request_timeout,
        }
    }
}

/// Per-request operation context, installed by [`scoped_request`].
#[derive(Clone)]
pub struct RequestScope {
    pub ctx: Context,
    pub request_id: Uuid,
}

/// Transport-level error with its HTTP mapping.
#[derive(Debug)]
pub enum ApiError {
    /// Undecodable body or path segment.
    BadRequest(String),
    NotFound(MessageId),
    Store(RepoError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Store(RepoError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            Self::Store(RepoError::Conflict(_)) => (StatusCode::CONFLICT, "conflict"),
            Self::Store(RepoError::Cancelled { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "cancelled")
            }
            Self::Store(RepoError::Integrity { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "integrity")
            }
            Self::Store(RepoError::Io { .. }) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            Self::Store(RepoError::IdSpaceExhausted) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "id_space_exhausted")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Self::BadRequest(details) => details.clone(),
            Self::NotFound(id) => format!("message {id} not found"),
            Self::Store(err) => err.to_string(),
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        Self::Store(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        Self::BadRequest(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        Self::BadRequest(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.message();
        if status.is_server_error() {
            warn!(
                "event=http_error module=api status={} error_code={} error={}",
                status.as_u16(),
                code,
                message
            );
        }
        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Builds the full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/messages", get(list_messages).post(create_message))
        .route(
            "/messages/:id",
            get(get_message).put(update_message).delete(delete_message),
        )
        .route("/messages/news/:news_id", get(list_messages_by_news))
        .route("/health", get(health));

    Router::new()
        .nest(API_PREFIX, api)
        .layer(middleware::from_fn_with_state(state.clone(), scoped_request))
        .with_state(state)
}

/// Runs the request under a timed child context and logs its outcome.
async fn scoped_request(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (ctx, handler) = state.root.child_with_timeout(state.request_timeout);
    request
        .extensions_mut()
        .insert(RequestScope { ctx, request_id });

    let mut response = next.run(request).await;
    handler.cancel();

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    info!(
        "event=http_request module=api status={} request_id={} method={} path={} duration_ms={}",
        response.status().as_u16(),
        request_id,
        method,
        path,
        started_at.elapsed().as_millis()
    );
    response
}

async fn list_messages(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(state.service.get_all_messages(&scope.ctx).await?))
}

async fn create_message(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    payload: Result<Json<Message>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(mut message) = payload?;
    state
        .service
        .create_message(&scope.ctx, &mut message)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_message(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult<Json<Message>> {
    let Path(id) = id?;
    state
        .service
        .get_message(&scope.ctx, id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn list_messages_by_news(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    news_id: Result<Path<NewsId>, PathRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Path(news_id) = news_id?;
    Ok(Json(
        state
            .service
            .get_messages_by_news_id(&scope.ctx, news_id)
            .await?,
    ))
}

async fn update_message(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<MessageId>, PathRejection>,
    payload: Result<Json<Message>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let Path(id) = id?;
    let Json(mut message) = payload?;
    message.id = id;
    state
        .service
        .update_message(&scope.ctx, &mut message)
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
    id: Result<Path<MessageId>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    state.service.delete_message(&scope.ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": core_version() }))
}
