use bytes::{Bytes, BytesMut};
use futures::Stream;
use tracing::{debug, warn};

use crate::backend::{ObjectReader, ObjectWriter};
use crate::error::{Error, Result};

/// Upper bound on what `read_to_end` reserves from the reported length.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    Eof,
    Closed,
}

/// Sequential reader over one object.
///
/// End of stream is `Ok(None)` from [`Reader::next_chunk`], never an error.
/// Closing is idempotent, and dropping an unclosed reader releases whatever
/// the backend holds.
pub struct Reader {
    key: String,
    inner: Box<dyn ObjectReader>,
    state: ReadState,
}

impl Reader {
    pub(crate) fn new(key: String, inner: Box<dyn ObjectReader>) -> Self {
        Self {
            key,
            inner,
            state: ReadState::Open,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object size, when the backend learned it while opening.
    pub fn content_length(&self) -> Option<u64> {
        self.inner.content_length()
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            ReadState::Closed => Err(Error::InvalidArgument(format!(
                "read from closed reader: {}",
                self.key
            ))),
            ReadState::Eof => Ok(None),
            ReadState::Open => loop {
                match self.inner.read_chunk().await? {
                    Some(chunk) if chunk.is_empty() => continue,
                    Some(chunk) => return Ok(Some(chunk)),
                    None => {
                        self.state = ReadState::Eof;
                        return Ok(None);
                    }
                }
            },
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let hint = self.content_length().unwrap_or(0).min(MAX_PREALLOC);
        let mut buf = BytesMut::with_capacity(hint as usize);
        while let Some(chunk) = self.next_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub async fn close(&mut self) -> Result<()> {
        if self.state == ReadState::Closed {
            return Ok(());
        }
        self.state = ReadState::Closed;
        self.inner.close().await
    }

    /// Turn the reader into a byte stream, closing it once drained.
    ///
    /// Dropping the stream early (a client going away mid-download) drops
    /// the reader with it.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        futures::stream::unfold(Some(self), |reader| async move {
            let mut reader = reader?;
            match reader.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => match reader.close().await {
                    Ok(()) => None,
                    Err(e) => Some((Err(e), None)),
                },
                Err(e) => {
                    if let Err(close_err) = reader.close().await {
                        warn!(key = %reader.key, error = %close_err, "failed to close reader");
                    }
                    Some((Err(e), None))
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteState {
    Open,
    Failed(String),
    Closed,
}

/// Sequential writer for one object.
///
/// Nothing is visible until [`Writer::close`] returns `Ok`. A writer dropped
/// before that is aborted.
pub struct Writer {
    key: String,
    inner: Box<dyn ObjectWriter>,
    state: WriteState,
    written: u64,
}

impl Writer {
    pub(crate) fn new(key: String, inner: Box<dyn ObjectWriter>) -> Self {
        Self {
            key,
            inner,
            state: WriteState::Open,
            written: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_bytes(Bytes::copy_from_slice(data)).await
    }

    pub async fn write_bytes(&mut self, data: Bytes) -> Result<()> {
        match &self.state {
            WriteState::Closed => {
                return Err(Error::InvalidArgument(format!(
                    "write to closed writer: {}",
                    self.key
                )));
            }
            WriteState::Failed(msg) => {
                return Err(Error::Internal(format!(
                    "writer for {} failed earlier: {msg}",
                    self.key
                )));
            }
            WriteState::Open => {}
        }

        let len = data.len() as u64;
        match self.inner.write(data).await {
            Ok(()) => {
                self.written += len;
                Ok(())
            }
            Err(e) => {
                self.state = WriteState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Commit the object. Any failure deferred by buffering surfaces here.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, WriteState::Closed) {
            WriteState::Closed => Err(Error::InvalidArgument(format!(
                "writer already closed: {}",
                self.key
            ))),
            WriteState::Failed(msg) => {
                self.inner.abort();
                Err(Error::Internal(format!(
                    "writer for {} failed earlier: {msg}",
                    self.key
                )))
            }
            WriteState::Open => match self.inner.commit().await {
                Ok(()) => {
                    debug!(key = %self.key, bytes = self.written, "object committed");
                    Ok(())
                }
                Err(e) => {
                    self.inner.abort();
                    Err(e)
                }
            },
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.state != WriteState::Closed {
            debug!(key = %self.key, bytes = self.written, "aborting uncommitted writer");
            self.inner.abort();
        }
    }
}
