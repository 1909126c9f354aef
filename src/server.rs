use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::models::{AskRequest, AskResponse, HistoryResponse, MessageResponse, SessionQuery};

#[derive(Clone)]
struct AppState {
    chat: ChatService,
}

pub fn build_router(chat: ChatService) -> Router {
    Router::new()
        .route("/ask_query", post(ask_query))
        .route("/get_chat_history", get(get_chat_history))
        .route("/delete_chat_history", delete(delete_chat_history))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { chat })
}

pub async fn run_server(config: AppConfig, chat: ChatService) -> Result<()> {
    let app = build_router(chat);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ask_query(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let session_id = request.session_id.clone();
    let answer = state
        .chat
        .ask(request)
        .await
        .map_err(|err| ApiError::logged(err, "ask_query", &session_id))?;
    Ok(Json(answer))
}

async fn get_chat_history(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state
        .chat
        .history(&query.session_id)
        .await
        .map_err(|err| ApiError::logged(err, "get_chat_history", &query.session_id))?;
    Ok(Json(history))
}

async fn delete_chat_history(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let response = state
        .chat
        .delete(&query.session_id)
        .await
        .map_err(|err| ApiError::logged(err, "delete_chat_history", &query.session_id))?;
    Ok(Json(response))
}

/// Every failure surfaces as a 500 carrying the error text.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn logged(err: anyhow::Error, endpoint: &str, session_id: &str) -> Self {
        tracing::error!(endpoint, session_id, "request failed: {:#}", err);
        Self::from(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: format!("{value:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "detail": self.detail });
        (self.status, Json(body)).into_response()
    }
}
