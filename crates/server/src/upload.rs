//! Multipart upload handling with a byte ceiling.

use axum::extract::Multipart;
use axum::http::{HeaderMap, header};
use gallery_core::Bucket;
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Form field carrying the file.
pub const FILE_FIELD: &str = "myFile";

/// Slack on top of the limit for multipart boundaries and part headers.
pub const FRAMING_ALLOWANCE: u64 = 16 * 1024;

/// Reject a request whose declared length can only mean an oversized file.
pub fn check_declared_length(headers: &HeaderMap, limit: u64) -> Result<()> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match declared {
        Some(size) if size > limit.saturating_add(FRAMING_ALLOWANCE) => {
            Err(AppError::UploadTooLarge { size, limit })
        }
        _ => Ok(()),
    }
}

/// Stream the `myFile` part into the bucket under its client filename.
///
/// The object only becomes visible once every byte is in and the limit held;
/// on any early return the writer is dropped uncommitted.
pub async fn store_upload(bucket: &Bucket, multipart: &mut Multipart, limit: u64) -> Result<String> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            debug!(field = ?field.name(), "skipping form field");
            continue;
        }

        let key = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(AppError::BadRequest("uploaded file has no name".into())),
        };

        let mut writer = bucket.open_writer(&key).await?;
        while let Some(chunk) = field.chunk().await? {
            let size = writer.bytes_written() + chunk.len() as u64;
            if size > limit {
                return Err(AppError::UploadTooLarge { size, limit });
            }
            writer.write_bytes(chunk).await?;
        }
        writer.close().await?;

        info!(key = %key, bytes = writer.bytes_written(), "stored upload");
        return Ok(key);
    }

    Err(AppError::BadRequest(format!("missing form field {FILE_FIELD:?}")))
}
