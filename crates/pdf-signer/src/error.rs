use axum::Json;
use axum::http::StatusCode;
use axum_core::response::{IntoResponse as AxumCoreIntoResponse, Response};
use serde::Serialize;

use crate::signing::{BundleError, SigningFailure};
use crate::validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum SigningServiceError {
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
    #[error("{0}")]
    InvalidUpload(#[from] ValidationError),
    #[error("malformed multipart request: {0}")]
    MalformedForm(String),
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("could not read the .pfx bundle: {0}")]
    UnreadableBundle(#[from] BundleError),
    #[error(transparent)]
    SigningExhausted(#[from] SigningFailure),
}

impl SigningServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUpload(_) | Self::MalformedForm(_) | Self::UnreadableBundle(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SigningExhausted(_) | Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Trait implementation to convert this error into an axum http response
impl AxumCoreIntoResponse for SigningServiceError {
    fn into_response(self) -> Response {
        let error = match &self {
            Self::Unexpected(fault) => format!("{fault:#}"),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorBody { error })).into_response()
    }
}
