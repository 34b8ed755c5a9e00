use crate::progress::CopyProgress;
use crate::store::{ObjectReader, ObjectStore, S3Location, StoreError, UploadedPart};
use bytes::{Bytes, BytesMut};
use clap::ValueEnum;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// S3 limit on the number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum VerifyMode {
    /// Destination size must equal source size
    Size,
    /// Size, plus per-part and composite MD5 ETag comparison
    #[default]
    Etag,
}

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] StoreError),

    #[error("cancelled before the transfer started")]
    Cancelled,

    #[error(
        "{size} bytes at {chunk_size} bytes per part needs {parts} parts (limit 10000); raise the part size"
    )]
    TooManyParts { size: u64, chunk_size: u64, parts: u64 },

    #[error("destination unavailable: {0}")]
    DestinationUnavailable(#[source] StoreError),

    #[error("reading part {part_number} from source failed after {bytes_copied} bytes: {source}")]
    SourceRead {
        part_number: i32,
        bytes_copied: u64,
        #[source]
        source: io::Error,
    },

    #[error("upload of part {part_number} failed after {bytes_copied} bytes: {source}")]
    PartUpload {
        part_number: i32,
        bytes_copied: u64,
        #[source]
        source: StoreError,
    },

    #[error("source reported {expected} bytes but the stream was empty")]
    EmptyStream { expected: u64 },

    #[error("completing the multipart upload failed: {0}")]
    CompleteFailed(#[source] StoreError),

    #[error("verification request failed: {0}")]
    VerifyFailed(#[source] StoreError),

    #[error("size mismatch after copy: source {expected} bytes, destination {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch on {what}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        what: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    pub bytes_copied: u64,
    pub parts: usize,
    /// False when the ETags could not be compared (e.g. KMS-encrypted destination).
    pub content_verified: bool,
}

/// `ceil(size / chunk_size)`.
pub fn part_count(size: u64, chunk_size: u64) -> u64 {
    size.div_ceil(chunk_size)
}

/// Strips the quotes S3 puts around ETags.
fn bare_etag(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

fn is_md5_hex(value: &str) -> bool {
    value.len() == 32 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Reads up to `chunk_size` bytes, stopping early only at end of stream.
///
/// The buffer is allocated once at `chunk_size` and never grows past it.
async fn read_chunk(reader: &mut ObjectReader, chunk_size: usize) -> io::Result<Bytes> {
    let mut chunk = BytesMut::with_capacity(chunk_size);
    while chunk.len() < chunk_size {
        let mut limited = (&mut *reader).take((chunk_size - chunk.len()) as u64);
        if limited.read_buf(&mut chunk).await? == 0 {
            break;
        }
    }
    Ok(chunk.freeze())
}

/// Content digests of the uploaded parts; decides whether ETags can be trusted as MD5s.
#[derive(Debug, Default)]
struct EtagTracker {
    digests: Vec<u8>,
    parts: usize,
    comparable: bool,
}

impl EtagTracker {
    fn new() -> Self {
        Self {
            comparable: true,
            ..Self::default()
        }
    }

    fn check_part(&mut self, part_number: i32, chunk: &[u8], etag: &str) -> Result<(), CopyError> {
        let digest = md5::compute(chunk);
        self.digests.extend_from_slice(&digest.0);
        self.parts += 1;

        let returned = bare_etag(etag).to_ascii_lowercase();
        if !is_md5_hex(&returned) {
            self.comparable = false;
            return Ok(());
        }
        let expected = format!("{:x}", digest);
        if returned != expected {
            return Err(CopyError::ChecksumMismatch {
                what: format!("part {}", part_number),
                expected,
                actual: returned,
            });
        }
        Ok(())
    }

    /// ETag S3 assigns to the completed upload.
    fn composite(&self) -> String {
        format!("{:x}-{}", md5::compute(&self.digests), self.parts)
    }
}

/// Copies single objects from the source store to the destination store.
pub struct StreamCopier {
    source: Arc<dyn ObjectStore>,
    dest: Arc<dyn ObjectStore>,
    chunk_size: u64,
    verify: VerifyMode,
}

impl StreamCopier {
    pub fn new(
        source: Arc<dyn ObjectStore>,
        dest: Arc<dyn ObjectStore>,
        chunk_size: u64,
        verify: VerifyMode,
    ) -> Self {
        Self {
            source,
            dest,
            chunk_size: chunk_size.max(1),
            verify,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Streams one object into the destination.
    ///
    /// At most one chunk is buffered at a time. `cancel` is honoured only
    /// before the destination write starts; an open multipart upload always
    /// runs to completion or is aborted on error.
    pub async fn copy_one(
        &self,
        source: &S3Location,
        dest: &S3Location,
        progress: &CopyProgress,
        cancel: &CancellationToken,
    ) -> Result<CopyReport, CopyError> {
        let head = self
            .source
            .head_object(source)
            .await
            .map_err(CopyError::SourceUnavailable)?;
        let size = head.size;
        progress.set_total(size);

        if size == 0 {
            if cancel.is_cancelled() {
                return Err(CopyError::Cancelled);
            }
            self.dest
                .put_empty(dest)
                .await
                .map_err(CopyError::DestinationUnavailable)?;
            let content_verified = self
                .verify(dest, 0, |etag| {
                    is_md5_hex(etag).then(|| format!("{:x}", md5::compute(b"")))
                })
                .await?;
            return Ok(CopyReport {
                bytes_copied: 0,
                parts: 0,
                content_verified,
            });
        }

        let parts = part_count(size, self.chunk_size);
        if parts > MAX_PARTS {
            return Err(CopyError::TooManyParts {
                size,
                chunk_size: self.chunk_size,
                parts,
            });
        }

        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        let upload_id = self
            .dest
            .create_multipart(dest)
            .await
            .map_err(CopyError::DestinationUnavailable)?;

        let transfer = self.transfer(source, dest, &upload_id, size, progress).await;
        let tracker = match transfer {
            Ok(tracker) => tracker,
            Err(e) => {
                self.abort(dest, &upload_id).await;
                return Err(e);
            }
        };

        let content_verified = self
            .verify(dest, size, |etag| {
                (self.verify == VerifyMode::Etag && tracker.comparable && etag.contains('-'))
                    .then(|| tracker.composite())
            })
            .await?;

        Ok(CopyReport {
            bytes_copied: size,
            parts: tracker.parts,
            content_verified: content_verified && tracker.comparable,
        })
    }

    /// Reads the source sequentially and uploads parts 1..N, then completes the upload.
    async fn transfer(
        &self,
        source: &S3Location,
        dest: &S3Location,
        upload_id: &str,
        size: u64,
        progress: &CopyProgress,
    ) -> Result<EtagTracker, CopyError> {
        let mut reader = self.source.open_read(source).await.map_err(|e| {
            CopyError::SourceRead {
                part_number: 1,
                bytes_copied: 0,
                source: io::Error::other(e),
            }
        })?;

        let mut completed_parts = Vec::new();
        let mut tracker = EtagTracker::new();
        let mut bytes_copied: u64 = 0;
        let mut part_number: i32 = 1;

        loop {
            let chunk = read_chunk(&mut reader, self.chunk_size as usize)
                .await
                .map_err(|e| CopyError::SourceRead {
                    part_number,
                    bytes_copied,
                    source: e,
                })?;
            if chunk.is_empty() {
                break;
            }

            let chunk_len = chunk.len() as u64;
            let etag = self
                .dest
                .upload_part(dest, upload_id, part_number, chunk.clone())
                .await
                .map_err(|e| CopyError::PartUpload {
                    part_number,
                    bytes_copied,
                    source: e,
                })?;
            if self.verify == VerifyMode::Etag {
                tracker.check_part(part_number, &chunk, &etag)?;
            } else {
                tracker.parts += 1;
            }

            completed_parts.push(UploadedPart { part_number, etag });
            bytes_copied += chunk_len;
            progress.add_completed(chunk_len);
            part_number += 1;
        }

        if completed_parts.is_empty() {
            return Err(CopyError::EmptyStream { expected: size });
        }

        self.dest
            .complete_multipart(dest, upload_id, completed_parts)
            .await
            .map_err(CopyError::CompleteFailed)?;

        Ok(tracker)
    }

    /// Best-effort cleanup; a failed abort is logged, never returned.
    async fn abort(&self, dest: &S3Location, upload_id: &str) {
        match self.dest.abort_multipart(dest, upload_id).await {
            Ok(()) => info!("Aborted multipart upload {} for {}", upload_id, dest),
            Err(e) => warn!(
                "Failed to abort multipart upload {} for {}: {}",
                upload_id, dest, e
            ),
        }
    }

    /// HEADs the destination and compares its size, then its ETag when
    /// `expected_etag` produces one for the returned ETag.
    async fn verify<F>(
        &self,
        dest: &S3Location,
        expected_size: u64,
        expected_etag: F,
    ) -> Result<bool, CopyError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let head = self
            .dest
            .head_object(dest)
            .await
            .map_err(CopyError::VerifyFailed)?;

        if head.size != expected_size {
            return Err(CopyError::SizeMismatch {
                expected: expected_size,
                actual: head.size,
            });
        }

        if self.verify == VerifyMode::Size {
            return Ok(false);
        }

        let actual = head
            .etag
            .as_deref()
            .map(|e| bare_etag(e).to_ascii_lowercase())
            .unwrap_or_default();
        match expected_etag(&actual) {
            Some(expected) if expected != actual => Err(CopyError::ChecksumMismatch {
                what: dest.to_string(),
                expected,
                actual,
            }),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}
