// src/api/mod.rs

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::bidding::engine::ExchangeCoordinator;
use crate::config::config_manager::AppConfig;
use crate::logging::runtime_logger::RuntimeLogger;

pub struct AppState {
    pub coordinator: ExchangeCoordinator,
    pub config: Arc<AppConfig>,
    pub runtime_logger: Arc<RuntimeLogger>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auction", post(handlers::handle_auction))
        .route("/status", get(handlers::handle_status))
        .with_state(state)
}
