//! HTTP-facing error taxonomy.

use crate::process_table::LifecycleError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use galaxy_common::{InvalidConfig, SlotError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    InvalidSlot(#[from] SlotError),

    #[error("No data provided")]
    MissingBody,

    #[error("Request body is not a JSON object: {0}")]
    MalformedBody(String),

    #[error(transparent)]
    InvalidConfig(#[from] InvalidConfig),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidSlot(_) | Self::MissingBody | Self::MalformedBody(_) | Self::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Offending input field, when there is one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidSlot(_) => Some("slot"),
            Self::InvalidConfig(e) => Some(e.field()),
            _ => None,
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::ScriptNotFound(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                Self::NotFound(format!("Script not found: {}", name))
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Details stay in the log
            Self::Internal(detail) => {
                error!("  Request failed: {}", detail);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = match self.field() {
            Some(field) => json!({ "error": message, "field": field }),
            None => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
