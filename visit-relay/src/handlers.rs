use std::sync::Arc;

use axum::{routing, Router};
use health::HealthRegistry;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::router::EventRouter;
use crate::websocket::ws_handler;

pub fn app(router: Arc<EventRouter>, liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        )
        .route("/ws/:device_id", routing::get(ws_handler))
        .layer(TraceLayer::new_for_http())
        // Dashboards connect from any origin.
        .layer(CorsLayer::permissive())
        .with_state(router)
}

pub async fn index() -> &'static str {
    "visit relay"
}
