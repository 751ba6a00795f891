use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload too large: {size} bytes exceeds limit of {limit}")]
    UploadTooLarge { size: u64, limit: u64 },

    #[error("Storage access denied: {0}")]
    PermissionDenied(String),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<gallery_core::Error> for AppError {
    fn from(err: gallery_core::Error) -> Self {
        match err {
            gallery_core::Error::NotFound(key) => AppError::NotFound(key),
            gallery_core::Error::InvalidArgument(msg) => AppError::BadRequest(msg),
            gallery_core::Error::PermissionDenied(msg) => AppError::PermissionDenied(msg),
            gallery_core::Error::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::BadRequest(_) | AppError::UploadTooLarge { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::PermissionDenied(_) => {
                (StatusCode::BAD_GATEWAY, "Storage unavailable".to_string())
            }
            AppError::Template(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, "request rejected");
        }
        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_errors_map_to_statuses() {
        let cases = [
            (gallery_core::Error::NotFound("a.png".into()), StatusCode::NOT_FOUND),
            (gallery_core::Error::InvalidArgument("..".into()), StatusCode::BAD_REQUEST),
            (gallery_core::Error::PermissionDenied("s3".into()), StatusCode::BAD_GATEWAY),
            (gallery_core::Error::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn oversized_upload_is_a_bad_request() {
        let err = AppError::UploadTooLarge {
            size: 200_000_000,
            limit: 100_000_000,
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
