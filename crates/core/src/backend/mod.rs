pub mod local;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Snapshot of one object taken while listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One page worth of listing parameters.
///
/// `start_after` and `page_token` are both exclusive lower bounds; a backend
/// is free to give `page_token` its own meaning as long as it round-trips the
/// token it returned in [`ListPage::next_page_token`].
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub prefix: Option<String>,
    pub start_after: Option<String>,
    pub page_token: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMetadata>,
    pub next_page_token: Option<String>,
}

/// A storage system that can back a [`crate::Bucket`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// URL scheme this backend was opened from, used in logs.
    fn scheme(&self) -> &'static str;

    async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>>;

    async fn open_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>>;

    async fn list_page(&self, request: &PageRequest) -> Result<ListPage>;

    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
pub trait ObjectReader: Send {
    /// Next chunk of the object, `None` once the object is exhausted.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;

    fn content_length(&self) -> Option<u64> {
        None
    }

    /// Release backend resources. Called at most once.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Make everything written so far visible under the key. Called at most once.
    async fn commit(&mut self) -> Result<()>;

    /// Discard the upload. Runs from `Drop`, so it must not block.
    fn abort(&mut self);
}

/// Cut one page out of a key-sorted sequence of objects.
///
/// Used by backends that hold their whole namespace locally; the page token
/// is simply the last key of the previous page.
pub(crate) fn paginate<I>(sorted: I, request: &PageRequest) -> ListPage
where
    I: IntoIterator<Item = ObjectMetadata>,
{
    let lower = match (request.page_token.as_deref(), request.start_after.as_deref()) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    let page_size = request.page_size.max(1);

    let mut iter = sorted
        .into_iter()
        .filter(|o| {
            request
                .prefix
                .as_deref()
                .is_none_or(|p| o.key.starts_with(p))
        })
        .filter(|o| lower.is_none_or(|l| o.key.as_str() > l))
        .peekable();

    let mut objects = Vec::new();
    while objects.len() < page_size {
        match iter.next() {
            Some(object) => objects.push(object),
            None => break,
        }
    }

    let next_page_token = if iter.peek().is_some() {
        objects.last().map(|o| o.key.clone())
    } else {
        None
    };
    ListPage {
        objects,
        next_page_token,
    }
}
