//! Health and service-description endpoints.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::time::Duration;

const PROVIDER_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// `GET /` - service banner.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": "voice-session",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "pipeline": "Transcribe -> Respond -> Synthesize",
        "endpoints": {
            "websocket": "/ws/{agent}",
            "health": "/health",
            "providers": "/api/v1/health/providers",
            "sessions": "/api/v1/sessions"
        }
    }))
}

/// `GET /health` - liveness plus session load and pipeline counters.
///
/// Does not call out to providers; see [`provider_health`] for that.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let active = state.registry.active_count();
    let max = state.registry.max_sessions();
    let usage = if max > 0 { active as f64 / max as f64 } else { 0.0 };

    let load = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voice-session",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "components": {
            "stt": state.providers.transcriber.name(),
            "llm": state.providers.responder.name(),
            "tts": state.providers.synthesizer.name(),
            "websocket": "ready"
        },
        "sessions": {
            "active": active,
            "max": max,
            "usage_percent": (usage * 100.0).round(),
            "load": load
        },
        "pipeline": state.registry.totals()
    }))
}

/// `GET /api/v1/health/providers` - check every stage's provider.
///
/// Responds 503 when any stage is unreachable so load balancers can act on it.
pub async fn provider_health(state: web::Data<AppState>) -> HttpResponse {
    let stages = state.providers.health(PROVIDER_CHECK_TIMEOUT).await;
    let all_reachable = stages.iter().all(|s| s.reachable);

    let body = json!({
        "status": if all_reachable { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "stages": stages
    });

    if all_reachable {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
