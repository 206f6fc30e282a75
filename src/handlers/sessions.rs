use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/sessions` - every open session, oldest first.
pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.registry.list();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active": sessions.len(),
        "max": state.registry.max_sessions(),
        "sessions": sessions
    }))
}

/// `GET /api/v1/sessions/{id}`
pub async fn get_session(
    state: web::Data<AppState>,
    session_id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = session_id.into_inner();
    state
        .registry
        .get(&session_id)
        .map(|summary| HttpResponse::Ok().json(summary))
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' is not active", session_id)))
}
