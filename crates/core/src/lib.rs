//! Portable object storage for the gallery.
//!
//! A [`Bucket`] gives the same open-for-read, open-for-write and list
//! operations over every storage system that implements [`Backend`]. Buckets
//! are opened from a URL whose scheme picks the backend through a
//! [`Registry`]:
//!
//! - `mem://` keeps objects in process memory,
//! - `file:///some/dir` stores them as files below a directory,
//! - `s3://bucket?region=..&endpoint=..` talks to S3 or an S3-compatible store.
//!
//! Other crates plug in more schemes with [`Registry::register`].

pub mod backend;
pub mod bucket;
pub mod error;
pub mod lister;
pub mod registry;
pub mod stream;

pub use backend::{Backend, ObjectMetadata};
pub use bucket::Bucket;
pub use error::{Error, Result};
pub use lister::{ListOptions, Lister, ListingCursor};
pub use registry::{Registry, open_bucket};
pub use stream::{Reader, Writer};

/// Best-effort MIME type from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "txt" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::content_type_for;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("cat.PNG"), "image/png");
        assert_eq!(content_type_for("a/b/photo.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }
}
