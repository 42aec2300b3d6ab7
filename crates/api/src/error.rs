use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use market_core::StorageError;
use runtime::EngineError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    err: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl ApiError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(err) => match err {
                StorageError::UnknownInstrument(_) | StorageError::NotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                StorageError::InvalidName(_) => StatusCode::BAD_REQUEST,
                StorageError::Conflict(_) => StatusCode::CONFLICT,
                // a stored row that no longer decodes is the server's problem
                StorageError::BadValue { .. } | StorageError::Backend(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Engine(err) => match err {
                EngineError::AlreadyRunning => StatusCode::CONFLICT,
                EngineError::Reload(_) => StatusCode::INTERNAL_SERVER_ERROR,
                EngineError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "invalid-input",
            StatusCode::NOT_FOUND => "not-found",
            _ => "invalid-state",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let msg = match &self {
            // backend details stay in the log
            Self::Storage(StorageError::Backend(_)) => None,
            other => Some(other.to_string()),
        };
        let body = ErrorBody {
            err: self.code(),
            msg,
        };
        (status, Json(body)).into_response()
    }
}
