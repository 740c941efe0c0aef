//! Router assembly.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, add_credits_handler, consume_credits_handler, create_partner_handler,
    get_balance_handler, get_partner_handler, get_transaction_handler, health_check_handler,
    list_transactions_handler, liveness_handler, readiness_handler,
};

/// Build the application router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/partners", post(create_partner_handler))
        .route("/api/v1/partners/{partner_id}", get(get_partner_handler))
        .route(
            "/api/v1/partners/{partner_id}/balance",
            get(get_balance_handler),
        )
        .route(
            "/api/v1/partners/{partner_id}/credits",
            post(add_credits_handler),
        )
        .route(
            "/api/v1/partners/{partner_id}/debits",
            post(consume_credits_handler),
        )
        .route(
            "/api/v1/partners/{partner_id}/transactions",
            get(list_transactions_handler),
        )
        .route("/api/v1/transactions/{id}", get(get_transaction_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
