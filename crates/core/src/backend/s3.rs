use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use s3::bucket::Bucket as S3Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::request::ResponseDataStream;
use s3::serde_types::Part;
use tracing::{debug, warn};
use url::Url;

use super::{Backend, ListPage, ObjectMetadata, ObjectReader, ObjectWriter, PageRequest};
use crate::bucket::Bucket;
use crate::content_type_for;
use crate::error::{Error, Result};
use crate::registry::{Registry, query_param};

pub const SCHEME: &str = "s3";

/// Writes are sent as a single PUT below this size, as multipart above it.
const PART_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_REGION: &str = "us-east-1";

/// S3 or S3-compatible (MinIO, R2, ...) bucket.
///
/// URL form: `s3://<bucket>?region=<region>&endpoint=<url>&prefix=<path>`.
/// A custom endpoint switches to path-style addressing. Credentials come from
/// the usual AWS environment variables and profile files unless
/// `anonymous=true` is given.
pub struct S3Backend {
    bucket: Box<S3Bucket>,
    prefix: String,
}

impl S3Backend {
    pub fn new(
        bucket_name: &str,
        region: Region,
        credentials: Credentials,
        path_style: bool,
        prefix: Option<&str>,
    ) -> Result<Self> {
        let mut bucket = S3Bucket::new(bucket_name, region, credentials)
            .map_err(|e| Error::InvalidArgument(format!("invalid s3 bucket {bucket_name}: {e}")))?;
        if path_style {
            bucket = bucket.with_path_style();
        }
        let prefix = prefix.unwrap_or("").trim_matches('/').to_string();
        Ok(Self { bucket, prefix })
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        let bucket_name = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidArgument(format!("missing bucket name in {url}")))?;

        let region_name = query_param(url, "region").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let endpoint = query_param(url, "endpoint");
        let region = match &endpoint {
            Some(endpoint) => Region::Custom {
                region: region_name,
                endpoint: endpoint.clone(),
            },
            None => region_name
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("invalid s3 region: {e}")))?,
        };

        let credentials = if query_param(url, "anonymous").as_deref() == Some("true") {
            Credentials::anonymous()
        } else {
            Credentials::default()
        }
        .map_err(|e| Error::PermissionDenied(format!("s3 credentials: {e}")))?;

        Self::new(
            bucket_name,
            region,
            credentials,
            endpoint.is_some(),
            query_param(url, "prefix").as_deref(),
        )
    }

    fn full_path(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix)
        }
    }

    fn strip_prefix(&self, key: String) -> String {
        if self.prefix.is_empty() {
            return key;
        }
        match key.strip_prefix(&format!("{}/", self.prefix)) {
            Some(stripped) => stripped.to_string(),
            None => key,
        }
    }

    async fn head(&self, key: &str) -> Result<Option<u64>> {
        let full = self.full_path(key);
        let (head, status) = self
            .bucket
            .head_object(&full)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(status, key)?;
        Ok(head.content_length.and_then(|len| u64::try_from(len).ok()))
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(SCHEME, |url: Url| async move {
        Ok(Bucket::new(S3Backend::from_url(&url)?))
    });
}

fn map_s3_error(key: &str, err: S3Error) -> Error {
    match err {
        S3Error::HttpFailWithBody(status, _) => Error::from_status(status, key),
        other => Error::Internal(format!("s3 request for {key} failed: {other}")),
    }
}

fn check_status(status: u16, key: &str) -> Result<()> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(Error::from_status(status, key))
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>> {
        let length = self.head(key).await?;
        let full = self.full_path(key);
        let stream = self
            .bucket
            .get_object_stream(&full)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(stream.status_code, key)?;
        Ok(Box::new(S3Reader {
            key: key.to_string(),
            stream: Some(stream),
            length,
        }))
    }

    async fn open_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(S3Writer {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            path: self.full_path(key),
            content_type: content_type_for(key),
            buffer: Vec::new(),
            upload: None,
        }))
    }

    async fn list_page(&self, request: &PageRequest) -> Result<ListPage> {
        let prefix = self.full_path(request.prefix.as_deref().unwrap_or(""));
        let start_after = request.start_after.as_deref().map(|k| self.full_path(k));
        let (result, status) = self
            .bucket
            .list_page(
                prefix,
                None,
                request.page_token.clone(),
                start_after,
                Some(request.page_size),
            )
            .await
            .map_err(|e| map_s3_error("list", e))?;
        check_status(status, "list")?;

        let objects = result
            .contents
            .into_iter()
            .map(|obj| ObjectMetadata {
                key: self.strip_prefix(obj.key),
                size: obj.size,
                last_modified: DateTime::parse_from_rfc3339(&obj.last_modified)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect();
        let next_page_token = if result.is_truncated {
            result.next_continuation_token
        } else {
            None
        };
        Ok(ListPage {
            objects,
            next_page_token,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // S3 deletes of absent keys succeed, so look first.
        self.head(key).await?;
        let full = self.full_path(key);
        let response = self
            .bucket
            .delete_object(&full)
            .await
            .map_err(|e| map_s3_error(key, e))?;
        check_status(response.status_code(), key)
    }
}

struct S3Reader {
    key: String,
    stream: Option<ResponseDataStream>,
    length: Option<u64>,
}

#[async_trait]
impl ObjectReader for S3Reader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match stream.bytes().next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(map_s3_error(&self.key, e)),
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    fn content_length(&self) -> Option<u64> {
        self.length
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }
}

struct MultipartUpload {
    upload_id: String,
    parts: Vec<Part>,
}

struct S3Writer {
    bucket: Box<S3Bucket>,
    key: String,
    path: String,
    content_type: &'static str,
    buffer: Vec<u8>,
    upload: Option<MultipartUpload>,
}

impl S3Writer {
    async fn send_part(&mut self, chunk: Vec<u8>) -> Result<()> {
        if self.upload.is_none() {
            let initiated = self
                .bucket
                .initiate_multipart_upload(&self.path, self.content_type)
                .await
                .map_err(|e| map_s3_error(&self.key, e))?;
            debug!(key = %self.key, upload_id = %initiated.upload_id, "multipart upload started");
            self.upload = Some(MultipartUpload {
                upload_id: initiated.upload_id,
                parts: Vec::new(),
            });
        }
        let Some(upload) = self.upload.as_mut() else {
            return Err(Error::Internal("multipart upload missing".into()));
        };

        let part_number = upload.parts.len() as u32 + 1;
        let part = self
            .bucket
            .put_multipart_chunk(
                chunk,
                &self.path,
                part_number,
                &upload.upload_id,
                self.content_type,
            )
            .await
            .map_err(|e| map_s3_error(&self.key, e))?;
        upload.parts.push(part);
        Ok(())
    }
}

#[async_trait]
impl ObjectWriter for S3Writer {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&data);
        while self.buffer.len() >= PART_SIZE {
            let rest = self.buffer.split_off(PART_SIZE);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            self.send_part(chunk).await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let buffer = std::mem::take(&mut self.buffer);
        if self.upload.is_none() {
            let response = self
                .bucket
                .put_object_with_content_type(&self.path, &buffer, self.content_type)
                .await
                .map_err(|e| map_s3_error(&self.key, e))?;
            return check_status(response.status_code(), &self.key);
        }

        if !buffer.is_empty() {
            self.send_part(buffer).await?;
        }
        let Some(upload) = self.upload.as_ref() else {
            return Err(Error::Internal("multipart upload missing".into()));
        };
        let response = self
            .bucket
            .complete_multipart_upload(&self.path, &upload.upload_id, upload.parts.clone())
            .await
            .map_err(|e| map_s3_error(&self.key, e))?;
        check_status(response.status_code(), &self.key)?;
        self.upload = None;
        Ok(())
    }

    fn abort(&mut self) {
        self.buffer.clear();
        let Some(upload) = self.upload.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %upload.upload_id, "no runtime to abort multipart upload");
            return;
        };
        let bucket = self.bucket.clone();
        let path = self.path.clone();
        handle.spawn(async move {
            if let Err(e) = bucket.abort_upload(&path, &upload.upload_id).await {
                warn!(path = %path, error = %e, "failed to abort multipart upload");
            }
        });
    }
}
