//! Google Cloud Storage support for the gallery: a small JSON API client and
//! the `gs://` bucket backend built on it.

pub mod auth;
pub mod backend;
pub mod client;
pub mod error;
pub mod objects;

pub use backend::{GcsBackend, register};
pub use client::GcsClient;
pub use error::GcsError;
