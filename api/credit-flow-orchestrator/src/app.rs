use crate::config::environment::AppConfig;
use crate::infra::InfraClients;
use crate::module::flow::crud::StatusCache;
use crate::module::{flow, webhook};
use crate::service::approved_simulation_service::ApprovedSimulationStore;
use axum::Router;
use axum::http::{HeaderValue, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<StatusCache>,
    pub approved: Arc<ApprovedSimulationStore>,
    pub infra: InfraClients,
}

impl AppState {
    pub fn new(config: AppConfig, infra: InfraClients) -> Self {
        Self {
            config,
            cache: Arc::new(StatusCache::default()),
            approved: Arc::new(ApprovedSimulationStore::default()),
            infra,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let origins = state
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    flow::route::register_routes(state.clone())
        .merge(webhook::route::register_routes(state))
        .layer(cors)
}
