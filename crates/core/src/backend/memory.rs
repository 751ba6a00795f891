use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Backend, ListPage, ObjectMetadata, ObjectReader, ObjectWriter, PageRequest, paginate};
use crate::error::{Error, Result};
use crate::registry::Registry;

pub const SCHEME: &str = "mem";

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
struct MemObject {
    data: Bytes,
    modified: DateTime<Utc>,
}

type Objects = Arc<RwLock<BTreeMap<String, MemObject>>>;

/// Process-local bucket. Contents vanish with the process.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Objects,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(SCHEME, |_url| async { Ok(crate::Bucket::new(MemoryBackend::new())) });
}

#[async_trait]
impl Backend for MemoryBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn open_reader(&self, key: &str) -> Result<Box<dyn ObjectReader>> {
        let objects = self.objects.read().await;
        match objects.get(key) {
            Some(object) => Ok(Box::new(MemReader {
                remaining: object.data.clone(),
                length: object.data.len() as u64,
            })),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn open_writer(&self, key: &str) -> Result<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemWriter {
            key: key.to_string(),
            data: BytesMut::new(),
            objects: self.objects.clone(),
        }))
    }

    async fn list_page(&self, request: &PageRequest) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let lower = match (request.page_token.as_deref(), request.start_after.as_deref()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let range = match lower {
            Some(key) => objects.range::<str, _>((Bound::Excluded(key), Bound::Unbounded)),
            None => objects.range::<str, _>(..),
        };
        let snapshot = range.map(|(key, object)| ObjectMetadata {
            key: key.clone(),
            size: object.data.len() as u64,
            last_modified: object.modified,
        });
        Ok(paginate(snapshot, request))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.write().await;
        match objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(key.to_string())),
        }
    }
}

struct MemReader {
    remaining: Bytes,
    length: u64,
}

#[async_trait]
impl ObjectReader for MemReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining.is_empty() {
            return Ok(None);
        }
        let n = self.remaining.len().min(CHUNK_SIZE);
        Ok(Some(self.remaining.split_to(n)))
    }

    fn content_length(&self) -> Option<u64> {
        Some(self.length)
    }
}

struct MemWriter {
    key: String,
    data: BytesMut,
    objects: Objects,
}

#[async_trait]
impl ObjectWriter for MemWriter {
    async fn write(&mut self, data: Bytes) -> Result<()> {
        self.data.extend_from_slice(&data);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let object = MemObject {
            data: std::mem::take(&mut self.data).freeze(),
            modified: Utc::now(),
        };
        let mut objects = self.objects.write().await;
        objects.insert(self.key.clone(), object);
        Ok(())
    }

    fn abort(&mut self) {
        self.data.clear();
    }
}
