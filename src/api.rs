//! REST API server for the spending coach
//!
//! Thin HTTP layer over the snapshot pipeline. Handlers deserialize,
//! delegate, and map pipeline errors onto status codes; no coaching logic
//! lives here.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::CoachError;
use crate::models::{Profile, RawAnswer};
use crate::pipeline::{SnapshotPipeline, DEFAULT_HISTORY_LIMIT};
use crate::survey::ConversationTurn;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    pub user_id: Uuid,
    pub answers: Vec<RawAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: Uuid,
    pub message: String,
    pub snapshot_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SurveyNextRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    #[serde(default)]
    pub collected: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: Uuid,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub changes: Profile,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<SnapshotPipeline>,
}

fn error_response(e: CoachError) -> (StatusCode, Json<ApiResponse>) {
    let status = match e {
        CoachError::UnprocessableInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    // Internal detail stays in the logs; callers get the category.
    let message = if e.is_user_visible() {
        e.to_string()
    } else {
        "Internal error".to_string()
    };
    (status, Json(ApiResponse::error(message)))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Intake Endpoint
/// =============================

async fn intake_handler(
    State(state): State<ApiState>,
    Json(req): Json<IntakeRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(user_id = %req.user_id, answers = req.answers.len(), "Received intake request");

    match state.pipeline.intake(req.user_id, &req.answers).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(user_id = %req.user_id, "Received chat request");

    match state
        .pipeline
        .chat(req.user_id, &req.message, req.snapshot_id)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome))),
        Err(e) => error_response(e),
    }
}

async fn chat_history_handler(
    State(state): State<ApiState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);

    match state.pipeline.chat_history(query.user_id, limit).await {
        Ok(history) => (StatusCode::OK, Json(ApiResponse::success(history))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Dashboard Endpoint
/// =============================

async fn dashboard_handler(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.pipeline.dashboard(query.user_id).await {
        Ok(view) => (StatusCode::OK, Json(ApiResponse::success(view))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Profile Endpoints
/// =============================

async fn profile_handler(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.pipeline.profile(query.user_id).await {
        Ok(view) => (StatusCode::OK, Json(ApiResponse::success(view))),
        Err(e) => error_response(e),
    }
}

async fn profile_update_handler(
    State(state): State<ApiState>,
    Json(req): Json<ProfileUpdateRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(user_id = %req.user_id, "Received profile update");

    match state
        .pipeline
        .update_profile(req.user_id, &req.changes)
        .await
    {
        Ok(view) => (StatusCode::OK, Json(ApiResponse::success(view))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Survey Endpoint
/// =============================

async fn survey_next_handler(
    State(state): State<ApiState>,
    Json(req): Json<SurveyNextRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let collected: HashSet<String> = req.collected.into_iter().collect();

    match state
        .pipeline
        .next_survey_prompt(req.user_id, &req.history, &collected)
        .await
    {
        Ok(prompt) => (StatusCode::OK, Json(ApiResponse::success(prompt))),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<SnapshotPipeline>) -> Router {
    let state = ApiState { pipeline };

    Router::new()
        .route("/health", get(health))
        .route("/api/intake", post(intake_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/history", get(chat_history_handler))
        .route("/api/dashboard", get(dashboard_handler))
        .route(
            "/api/profile",
            get(profile_handler).put(profile_update_handler),
        )
        .route("/api/survey/next", post(survey_next_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<SnapshotPipeline>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(pipeline);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let (status, Json(body)) =
            error_response(CoachError::UnprocessableInput("bad input".to_string()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.error.as_deref(), Some("Unprocessable input: bad input"));

        let (status, Json(body)) =
            error_response(CoachError::PersistenceFailure("db down".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.error.as_deref().unwrap().contains("Persistence failure"));
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let (status, Json(body)) = error_response(CoachError::GenerationUnavailable(
            "api key sk-123 rejected".to_string(),
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.error.as_deref(), Some("Internal error"));
    }

    #[test]
    fn test_api_response_shape() {
        let response = ApiResponse::success(serde_json::json!({"ok": true}));
        assert!(response.success);
        assert!(response.error.is_none());
        assert_eq!(response.data.unwrap()["ok"], true);
    }
}
