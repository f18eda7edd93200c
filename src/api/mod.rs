pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tools", get(handlers::list_tools))
        .route("/tools/{kind}/start", post(handlers::start_tool))
        .route("/tools/{kind}/stop", post(handlers::stop_tool))
        .route("/tools/{kind}/stream", get(handlers::stream_tool))
        .route("/tools/{kind}/state", get(handlers::tool_state))
        .route("/tools/{kind}/capture", post(handlers::capture_frame))
        .with_state(state)
}
