//! Capped text previews of output files.

use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncReadExt;

use crate::error::CoreError;

/// Default preview cap (5 MiB).
pub const DEFAULT_PREVIEW_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Text content of a file, possibly truncated.
#[derive(Debug, Clone, Serialize)]
pub struct FilePreview {
    /// Size of the file on disk, independent of truncation.
    pub size: u64,
    pub content: String,
    /// Whether `content` stops before the end of the file.
    pub truncated: bool,
}

/// Read up to `max_bytes` of `path` as text.
///
/// Never fails on content: bytes that are not UTF-8 are decoded as
/// Latin-1, which maps every byte to one character. A multi-byte sequence
/// cut in half by the cap is dropped instead of forcing the fallback.
pub async fn read_preview(path: &Path, max_bytes: u64) -> Result<FilePreview, CoreError> {
    let read_err = |e: std::io::Error| CoreError::ReadFailure(format!("{}: {e}", path.display()));

    let file = tokio::fs::File::open(path).await.map_err(read_err)?;
    let size = file.metadata().await.map_err(read_err)?.len();

    let mut bytes = Vec::with_capacity(size.min(max_bytes) as usize);
    file.take(max_bytes)
        .read_to_end(&mut bytes)
        .await
        .map_err(read_err)?;

    let truncated = (bytes.len() as u64) < size;
    Ok(FilePreview {
        size,
        content: decode_text(bytes, truncated),
        truncated,
    })
}

fn decode_text(bytes: Vec<u8>, truncated: bool) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let utf8 = err.utf8_error();
            // `error_len() == None` means the input ended mid-character.
            if truncated && utf8.error_len().is_none() {
                let valid = utf8.valid_up_to();
                let mut bytes = err.into_bytes();
                bytes.truncate(valid);
                String::from_utf8(bytes).unwrap_or_default()
            } else {
                err.into_bytes().iter().map(|&b| char::from(b)).collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
