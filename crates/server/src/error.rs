use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use patrimo_core::{PeriodError, StoreError};
use patrimo_dvf::{GeoError, PriceError, PriceErrorKind};
use patrimo_import::ImportError;

/// Application error with an HTTP status. Client-facing messages never carry
/// internal details; those are logged.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            internal: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_gateway(msg: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self {
            internal: Some(err.into()),
            ..Self::new(StatusCode::BAD_GATEWAY, msg)
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self {
            internal: Some(err.into()),
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, "An internal error occurred")
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(status = %self.status, error = %err, "Request failed");
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::internal(err)
    }
}

impl From<PeriodError> for AppError {
    fn from(err: PeriodError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Csv(e) => Self::bad_request(e.to_string()),
            ImportError::Store(e) => Self::internal(e),
        }
    }
}

impl From<PriceError> for AppError {
    fn from(err: PriceError) -> Self {
        match err.kind() {
            PriceErrorKind::InvalidInput => Self::bad_request(err.to_string()),
            PriceErrorKind::InsufficientSample => Self::not_found("Échantillon insuffisant"),
            PriceErrorKind::UpstreamUnavailable => Self::bad_gateway("Price data unavailable", err),
            PriceErrorKind::Internal => Self::internal(err),
        }
    }
}

impl From<GeoError> for AppError {
    fn from(err: GeoError) -> Self {
        match err {
            GeoError::EmptyQuery => Self::bad_request(err.to_string()),
            GeoError::Unavailable(_) => Self::bad_gateway("Commune search unavailable", err),
        }
    }
}
