use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod listings;
pub mod metrics;
pub mod middleware;
pub mod payments;
pub mod state;
pub mod webhooks;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::USER_AGENT]);

    // Everything that acts on behalf of a user needs a principal
    let authenticated = Router::new()
        .merge(bookings::routes())
        .merge(payments::routes())
        .merge(listings::routes())
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_principal,
        ));

    Router::new()
        .merge(authenticated)
        .merge(listings::public_routes())
        .merge(webhooks::routes())
        .route("/health", get(health))
        .route("/metrics", get(export_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.export() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}
