//! HTTP application wiring: routes, middleware and server construction.
//!
//! Kept separate from `main` so integration tests can start the exact same server on
//! an ephemeral port.

use crate::state::AppState;
use crate::{handlers, health, websocket};
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use tracing_actix_web::TracingLogger;

/// Register every route on a service config.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health::index))
        .route("/health", web::get().to(health::health_check))
        .route("/ws/{agent}", web::get().to(websocket::session_websocket))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/health/providers", web::get().to(health::provider_health))
                .route("/sessions", web::get().to(handlers::list_sessions))
                .route("/sessions/{id}", web::get().to(handlers::get_session))
                .route("/config", web::get().to(handlers::get_config)),
        );
}

/// Build the HTTP server on an already-bound listener.
///
/// The returned [`Server`] must be awaited (or spawned) to start serving.
pub fn run(listener: TcpListener, state: AppState, workers: Option<usize>) -> std::io::Result<Server> {
    let data = web::Data::new(state);

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(configure)
    });

    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    Ok(server.listen(listener)?.run())
}
