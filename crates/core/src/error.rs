use std::io;

use thiserror::Error;

/// Portable bucket errors.
///
/// Every backend translates its native failures into one of these variants at
/// its boundary, so callers only ever branch on this closed set.
#[derive(Debug, Error)]
pub enum Error {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Error::Internal(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Classify an HTTP-ish status code returned by a remote backend.
    pub fn from_status(status: u16, context: impl Into<String>) -> Self {
        let context = context.into();
        match status {
            404 => Error::NotFound(context),
            401 | 403 => Error::PermissionDenied(context),
            400 | 411 | 413 | 414 => Error::InvalidArgument(context),
            _ => Error::Internal(format!("{context} (status {status})")),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(e.to_string()),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            io::ErrorKind::InvalidInput => Error::InvalidArgument(e.to_string()),
            _ => Error::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "no").into();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err: Error = io::Error::other("disk on fire").into();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn status_codes_are_classified() {
        assert!(Error::from_status(404, "cat.png").is_not_found());
        assert!(matches!(
            Error::from_status(403, "cat.png"),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            Error::from_status(400, "cat.png"),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            Error::from_status(503, "cat.png"),
            Error::Internal(_)
        ));
    }
}
