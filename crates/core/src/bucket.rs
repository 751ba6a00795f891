use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::lister::{ListOptions, Lister};
use crate::stream::{Reader, Writer};

/// Handle to one storage namespace.
///
/// Cloning is cheap and every clone talks to the same backend; the backend
/// does its own synchronization, so a single bucket serves any number of
/// concurrent operations.
#[derive(Clone)]
pub struct Bucket {
    backend: Arc<dyn Backend>,
}

impl Bucket {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn scheme(&self) -> &'static str {
        self.backend.scheme()
    }

    /// Open `key` for reading from offset 0. Fails with `NotFound` if absent.
    pub async fn open_reader(&self, key: &str) -> Result<Reader> {
        validate_key(key)?;
        let inner = self.backend.open_reader(key).await?;
        debug!(scheme = self.scheme(), key, "opened reader");
        Ok(Reader::new(key.to_string(), inner))
    }

    /// Open `key` for writing. The object is created or replaced when the
    /// writer is closed successfully.
    pub async fn open_writer(&self, key: &str) -> Result<Writer> {
        validate_key(key)?;
        let inner = self.backend.open_writer(key).await?;
        debug!(scheme = self.scheme(), key, "opened writer");
        Ok(Writer::new(key.to_string(), inner))
    }

    pub fn list(&self, options: ListOptions) -> Lister {
        Lister::new(self.backend.clone(), options)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.backend.delete(key).await?;
        debug!(scheme = self.scheme(), key, "deleted object");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.open_reader(key).await {
            Ok(mut reader) => {
                reader.close().await?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn read_all(&self, key: &str) -> Result<Bytes> {
        let mut reader = self.open_reader(key).await?;
        let data = reader.read_to_end().await;
        let closed = reader.close().await;
        let data = data?;
        closed?;
        Ok(data)
    }

    pub async fn write_all(&self, key: &str, data: impl Into<Bytes>) -> Result<()> {
        let mut writer = self.open_writer(key).await?;
        writer.write_bytes(data.into()).await?;
        writer.close().await
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("scheme", &self.scheme())
            .finish()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("object key must not be empty".into()));
    }
    Ok(())
}
