use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{error, warn};
use thiserror::Error;

use crate::error::ToolError;
use crate::models::ToolKind;

use super::handlers::ToolReply;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("{0} is not running")]
    NotRunning(ToolKind),

    #[error("{0} runs as an external worker and has no frame stream here")]
    External(ToolKind),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, status) = match &self {
            Self::UnknownTool(_) => (StatusCode::NOT_FOUND, "error"),
            Self::NotRunning(_) => (StatusCode::NOT_FOUND, "not_running"),
            Self::External(_) => (StatusCode::CONFLICT, "error"),
            Self::Tool(ToolError::ResourceBusy { .. }) => (StatusCode::CONFLICT, "already_running"),
            Self::Tool(ToolError::Startup { .. }) => (StatusCode::SERVICE_UNAVAILABLE, "error"),
            Self::Tool(_) | Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error"),
        };

        if status_code.is_server_error() {
            error!("request failed: {self:#}");
        } else {
            warn!("request rejected: {self}");
        }
        (status_code, Json(ToolReply::new(status, self.to_string()))).into_response()
    }
}
