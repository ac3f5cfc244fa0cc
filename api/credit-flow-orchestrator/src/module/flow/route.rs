use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{delete, get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(controller::health))
        .route("/v1/flows", post(controller::start_flow))
        .route("/v1/flows/cache/stats", get(controller::get_cache_stats))
        .route(
            "/v1/flows/phases/document",
            post(controller::run_document_phase),
        )
        .route(
            "/v1/flows/phases/signature",
            post(controller::run_signature_phase),
        )
        .route("/v1/flows/phases/margin", post(controller::run_margin_phase))
        .route(
            "/v1/flows/phases/simulation",
            post(controller::run_simulation_phase),
        )
        .route("/v1/flows/:cpf", delete(controller::clear_flow))
        .route("/v1/flows/:cpf/status", get(controller::get_flow_status))
        .route("/v1/flows/:cpf/margin", get(controller::get_margin_data))
        .with_state(state)
}
