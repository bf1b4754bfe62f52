use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::server::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Serialize)]
pub(crate) struct AssistantMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
pub(crate) struct ChatResponse {
    model: String,
    created_at: String,
    message: AssistantMessage,
    done: bool,
}

#[derive(Serialize)]
pub(crate) struct GenerateResponse {
    model: String,
    created_at: String,
    response: String,
    done: bool,
}

#[derive(Serialize)]
pub(crate) struct ModelTag {
    name: String,
    model: String,
    modified_at: String,
    size: u64,
    digest: &'static str,
}

#[derive(Serialize)]
pub(crate) struct TagsResponse {
    models: Vec<ModelTag>,
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// The question a chat request asks: the content of its last `user` message.
fn last_user_message(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
}

pub(crate) async fn health_handler(State(state): State<AppState>) -> Response {
    match state.service.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ready",
            "model": &*state.model_name,
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "database_stats": stats,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

pub(crate) async fn tags_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(TagsResponse {
        models: vec![ModelTag {
            name: state.model_name.to_string(),
            model: state.model_name.to_string(),
            modified_at: state.started_rfc3339.to_string(),
            size: 0,
            digest: "ragex",
        }],
    })
}

pub(crate) async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    let question = last_user_message(&req.messages)
        .ok_or_else(|| ApiError::bad_request("no user message found"))?;
    tracing::info!(
        requested_model = req.model.as_deref(),
        question_len = question.len(),
        "chat request"
    );

    let answer = state.service.query(question, state.default_k, None).await?;
    Ok(Json(ChatResponse {
        model: state.model_name.to_string(),
        created_at: now_rfc3339(),
        message: AssistantMessage {
            role: "assistant",
            content: answer,
        },
        done: true,
    }))
}

pub(crate) async fn generate_handler(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt is required"));
    }
    tracing::info!(
        requested_model = req.model.as_deref(),
        prompt_len = req.prompt.len(),
        "generate request"
    );

    let answer = state
        .service
        .query(&req.prompt, state.default_k, None)
        .await?;
    Ok(Json(GenerateResponse {
        model: state.model_name.to_string(),
        created_at: now_rfc3339(),
        response: answer,
        done: true,
    }))
}

pub(crate) async fn stats_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state.service.stats().await?;
    Ok(Json(serde_json::json!({
        "total_points": stats.total_points,
        "database_stats": stats,
        "model": &*state.model_name,
    })))
}
