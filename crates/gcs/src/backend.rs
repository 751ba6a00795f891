use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use gallery_core::backend::{ListPage, ObjectMetadata, ObjectReader, ObjectWriter, PageRequest};
use gallery_core::registry::query_param;
use gallery_core::{Backend, Bucket, Error, Registry, Result};
use tracing::debug;
use url::Url;

use crate::client::GcsClient;
use crate::objects::ListParams;

pub const SCHEME: &str = "gs";

/// Bucket backed by Google Cloud Storage.
///
/// Opened from `gs://bucket?prefix=dir`; objects live under `prefix/` when a
/// prefix is given.
#[derive(Clone)]
pub struct GcsBackend {
    client: GcsClient,
    bucket: String,
    prefix: String,
}

impl GcsBackend {
    pub fn new(client: GcsClient, bucket: impl Into<String>, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.unwrap_or("").trim_matches('/').to_string(),
        }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidArgument(format!("missing bucket name in {url}")))?;
        let client = GcsClient::from_env().map_err(|e| e.into_bucket_error(bucket))?;
        let prefix = query_param(url, "prefix");
        Ok(Self::new(client, bucket, prefix.as_deref()))
    }

    fn full_path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn strip_prefix(&self, name: String) -> String {
        if self.prefix.is_empty() {
            return name;
        }
        match name.strip_prefix(&format!("{}/", self.prefix)) {
            Some(stripped) => stripped.to_string(),
            None => name,
        }
    }

    fn list_params(&self, request: &PageRequest) -> ListParams {
        let prefix = match (&request.prefix, self.prefix.is_empty()) {
            (None, true) => None,
            (Some(p), _) => Some(self.full_path(p)),
            (None, false) => Some(format!("{}/", self.prefix)),
        };
        ListParams {
            prefix,
            page_token: request.page_token.clone(),
            start_offset: request.start_after.as_deref().map(|k| self.full_path(k)),
            max_results: request.page_size,
        }
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(SCHEME, |url: Url| async move {
        Ok(Bucket::new(GcsBackend::from_url(&url)?))
    });
}

#[async_trait]
impl Backend for GcsBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>> {
        let name = self.full_path(key);
        let object = self
            .client
            .get_object(&self.bucket, &name)
            .await
            .map_err(|e| e.into_bucket_error(key))?;
        let resp = self
            .client
            .download(&self.bucket, &name)
            .await
            .map_err(|e| e.into_bucket_error(key))?;
        Ok(Box::new(GcsReader {
            key: key.to_string(),
            length: object.size,
            body: resp.bytes_stream().boxed(),
        }))
    }

    async fn open_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(GcsWriter {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            name: self.full_path(key),
            buffer: BytesMut::new(),
        }))
    }

    async fn list_page(&self, request: &PageRequest) -> Result<ListPage> {
        let params = self.list_params(request);
        let list = self
            .client
            .list_objects(&self.bucket, &params)
            .await
            .map_err(|e| e.into_bucket_error(&self.bucket))?;

        let objects = list
            .items
            .into_iter()
            // startOffset is inclusive, the listing bound is not.
            .filter(|item| params.start_offset.as_deref() != Some(item.name.as_str()))
            .map(|item| ObjectMetadata {
                key: self.strip_prefix(item.name),
                size: item.size,
                last_modified: item.updated.unwrap_or_else(Utc::now),
            })
            .collect();
        Ok(ListPage {
            objects,
            next_page_token: list.next_page_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object(&self.bucket, &self.full_path(key))
            .await
            .map_err(|e| e.into_bucket_error(key))
    }
}

struct GcsReader {
    key: String,
    length: u64,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
}

#[async_trait]
impl ObjectReader for GcsReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.body.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(Error::Internal(format!("reading {} from GCS: {e}", self.key))),
            None => Ok(None),
        }
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.length)
    }
}

/// Buffers the object and sends it as one media upload on commit.
struct GcsWriter {
    client: GcsClient,
    bucket: String,
    key: String,
    name: String,
    buffer: BytesMut,
}

#[async_trait]
impl ObjectWriter for GcsWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let data = std::mem::take(&mut self.buffer).freeze();
        let size = data.len();
        let content_type = gallery_core::content_type_for(&self.key);
        self.client
            .upload(&self.bucket, &self.name, content_type, data)
            .await
            .map_err(|e| e.into_bucket_error(&self.key))?;
        debug!(bucket = %self.bucket, name = %self.name, size, "uploaded object");
        Ok(())
    }

    fn abort(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;

    fn gcs_backend(prefix: Option<&str>) -> GcsBackend {
        let client =
            GcsClient::with_base_url(Credentials::Anonymous, "http://localhost:4443").unwrap();
        GcsBackend::new(client, "photos", prefix)
    }

    #[test]
    fn prefix_is_applied_and_stripped() {
        let prefixed = gcs_backend(Some("/gallery/"));
        assert_eq!(prefixed.full_path("cat.png"), "gallery/cat.png");
        assert_eq!(prefixed.strip_prefix("gallery/cat.png".into()), "cat.png");

        let bare = gcs_backend(None);
        assert_eq!(bare.full_path("cat.png"), "cat.png");
        assert_eq!(bare.strip_prefix("cat.png".into()), "cat.png");
    }

    #[test]
    fn list_params_carry_bounds_under_prefix() {
        let backend = gcs_backend(Some("gallery"));
        let params = backend.list_params(&PageRequest {
            prefix: None,
            start_after: Some("b.png".into()),
            page_token: Some("tok".into()),
            page_size: 50,
        });
        assert_eq!(params.prefix.as_deref(), Some("gallery/"));
        assert_eq!(params.start_offset.as_deref(), Some("gallery/b.png"));
        assert_eq!(params.page_token.as_deref(), Some("tok"));
        assert_eq!(params.max_results, 50);

        let params = backend.list_params(&PageRequest {
            prefix: Some("cats/".into()),
            page_size: 10,
            ..Default::default()
        });
        assert_eq!(params.prefix.as_deref(), Some("gallery/cats/"));

        let params = gcs_backend(None).list_params(&PageRequest::default());
        assert!(params.prefix.is_none());
        assert!(params.start_offset.is_none());
    }

    #[test]
    fn url_without_bucket_is_rejected() {
        let url = Url::parse("gs:///?prefix=x").unwrap();
        assert!(matches!(
            GcsBackend::from_url(&url),
            Err(Error::InvalidArgument(_))
        ));
    }
}
