use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::post;

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/webhooks/partner", post(controller::receive_partner_callback))
        .with_state(state)
}
