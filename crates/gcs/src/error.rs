use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcsError {
    #[error("GCS request returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("GCS transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GCS authentication failed: {0}")]
    Auth(String),

    #[error("invalid GCS url: {0}")]
    Url(String),

    #[error("max retries exceeded for {0}")]
    RetriesExhausted(String),
}

pub type Result<T> = std::result::Result<T, GcsError>;

impl GcsError {
    /// Translate into the portable bucket error for `key`.
    pub fn into_bucket_error(self, key: &str) -> gallery_core::Error {
        match self {
            GcsError::Status { status, .. } => gallery_core::Error::from_status(status.as_u16(), key),
            GcsError::Auth(msg) => gallery_core::Error::PermissionDenied(msg),
            GcsError::Url(msg) => gallery_core::Error::InvalidArgument(msg),
            other => gallery_core::Error::Internal(format!("{key}: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_bucket_errors() {
        let err = GcsError::Status {
            status: StatusCode::NOT_FOUND,
            body: "No such object".into(),
        };
        assert!(err.into_bucket_error("cat.png").is_not_found());

        let err = GcsError::Status {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        };
        assert!(matches!(
            err.into_bucket_error("cat.png"),
            gallery_core::Error::PermissionDenied(_)
        ));

        let err = GcsError::RetriesExhausted("https://storage.googleapis.com".into());
        assert!(matches!(
            err.into_bucket_error("cat.png"),
            gallery_core::Error::Internal(_)
        ));
    }
}
