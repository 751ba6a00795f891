use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::Stream;
use tracing::trace;

use crate::backend::{Backend, DEFAULT_PAGE_SIZE, ObjectMetadata, PageRequest};
use crate::error::Result;

/// Position in a listing, taken after the last object a [`Lister`] returned.
///
/// Treat it as opaque; hand it back through [`ListOptions::start_after`] to
/// resume a scan with a fresh lister.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCursor(String);

impl ListingCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ListingCursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ListingCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub page_size: Option<usize>,
    pub start_after: Option<ListingCursor>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn start_after(mut self, cursor: ListingCursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// Lazy, page-at-a-time enumeration of a bucket.
///
/// Every lister owns its own page token and buffer, so two listers over the
/// same bucket never disturb each other.
pub struct Lister {
    backend: Arc<dyn Backend>,
    request: PageRequest,
    buffered: VecDeque<ObjectMetadata>,
    exhausted: bool,
    cursor: Option<ListingCursor>,
}

impl Lister {
    pub(crate) fn new(backend: Arc<dyn Backend>, options: ListOptions) -> Self {
        let request = PageRequest {
            prefix: options.prefix,
            start_after: options.start_after.map(|c| c.0),
            page_token: None,
            page_size: options.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
        };
        Self {
            backend,
            request,
            buffered: VecDeque::new(),
            exhausted: false,
            cursor: None,
        }
    }

    /// Next object, or `None` once the listing is complete.
    ///
    /// After an error the lister is finished and keeps returning `None`.
    pub async fn next(&mut self) -> Result<Option<ObjectMetadata>> {
        loop {
            if let Some(object) = self.buffered.pop_front() {
                self.cursor = Some(ListingCursor(object.key.clone()));
                return Ok(Some(object));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = match self.backend.list_page(&self.request).await {
                Ok(page) => page,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            };
            trace!(
                scheme = self.backend.scheme(),
                objects = page.objects.len(),
                more = page.next_page_token.is_some(),
                "fetched listing page"
            );

            match page.next_page_token {
                // A backend handing back the same token with nothing in the
                // page would spin forever.
                Some(token)
                    if page.objects.is_empty()
                        && self.request.page_token.as_deref() == Some(token.as_str()) =>
                {
                    self.exhausted = true;
                }
                Some(token) => self.request.page_token = Some(token),
                None => self.exhausted = true,
            }
            self.buffered.extend(page.objects);
        }
    }

    pub fn cursor(&self) -> Option<&ListingCursor> {
        self.cursor.as_ref()
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ObjectMetadata>> + Send + 'static {
        futures::stream::unfold(self, |mut lister| async move {
            match lister.next().await {
                Ok(Some(object)) => Some((Ok(object), lister)),
                Ok(None) => None,
                Err(e) => Some((Err(e), lister)),
            }
        })
    }

    /// Drain the whole listing into memory.
    pub async fn collect_all(mut self) -> Result<Vec<ObjectMetadata>> {
        let mut objects = Vec::new();
        while let Some(object) = self.next().await? {
            objects.push(object);
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::TryStreamExt;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{ListPage, ObjectReader, ObjectWriter};
    use crate::bucket::Bucket;
    use crate::error::Error;

    async fn bucket_with(keys: &[&str]) -> Bucket {
        let bucket = Bucket::new(MemoryBackend::new());
        for key in keys {
            bucket.write_all(key, key.as_bytes().to_vec()).await.unwrap();
        }
        bucket
    }

    async fn keys(lister: Lister) -> Vec<String> {
        lister
            .collect_all()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect()
    }

    #[tokio::test]
    async fn every_page_size_sees_every_key_once() {
        let names: Vec<String> = (0..25).map(|i| format!("img-{i:02}.png")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let bucket = bucket_with(&refs).await;

        for page_size in [1, 2, 7, 25, 1000] {
            let listed = keys(bucket.list(ListOptions::new().page_size(page_size))).await;
            assert_eq!(listed, names, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn listers_are_independent() {
        let bucket = bucket_with(&["a.png", "b.png", "c.png"]).await;

        let mut first = bucket.list(ListOptions::new().page_size(1));
        assert_eq!(first.next().await.unwrap().unwrap().key, "a.png");

        // A fresh lister restarts while the first is mid-scan.
        let second = keys(bucket.list(ListOptions::new().page_size(1))).await;
        assert_eq!(second, ["a.png", "b.png", "c.png"]);

        assert_eq!(first.next().await.unwrap().unwrap().key, "b.png");
        assert_eq!(first.next().await.unwrap().unwrap().key, "c.png");
        assert!(first.next().await.unwrap().is_none());
        assert!(first.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cursor_resumes_a_scan() {
        let bucket = bucket_with(&["a.png", "b.png", "c.png", "d.png"]).await;
        let mut lister = bucket.list(ListOptions::new().page_size(3));
        assert!(lister.cursor().is_none());
        lister.next().await.unwrap();
        lister.next().await.unwrap();
        let cursor = lister.cursor().cloned().unwrap();
        assert_eq!(cursor.as_str(), "b.png");

        let rest = keys(bucket.list(ListOptions::new().start_after(cursor))).await;
        assert_eq!(rest, ["c.png", "d.png"]);
    }

    #[tokio::test]
    async fn prefix_filters_and_stream_matches() {
        let bucket = bucket_with(&["cats/a.png", "cats/b.png", "dogs/a.png"]).await;
        let objects: Vec<_> = bucket
            .list(ListOptions::new().prefix("cats/").page_size(1))
            .into_stream()
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["cats/a.png", "cats/b.png"]);
        assert_eq!(objects[0].size, "cats/a.png".len() as u64);
    }

    struct BrokenBackend;

    #[async_trait]
    impl Backend for BrokenBackend {
        fn scheme(&self) -> &'static str {
            "broken"
        }

        async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>> {
            Err(Error::NotFound(key.to_string()))
        }

        async fn open_writer(&self, _key: &str) -> Result<Box<dyn ObjectWriter>> {
            Err(Error::Internal("read only".into()))
        }

        async fn list_page(&self, _request: &PageRequest) -> Result<ListPage> {
            Err(Error::PermissionDenied("list".into()))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            Err(Error::NotFound(key.to_string()))
        }
    }

    #[tokio::test]
    async fn backend_error_ends_the_listing() {
        let bucket = Bucket::new(BrokenBackend);
        let mut lister = bucket.list(ListOptions::new());
        assert!(matches!(
            lister.next().await.err().unwrap(),
            Error::PermissionDenied(_)
        ));
        assert!(lister.next().await.unwrap().is_none());
    }
}
