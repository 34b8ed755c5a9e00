use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::pin::Pin;
use tokio::io::AsyncRead;

#[cfg(test)]
use mockall::automock;

/// A bucket plus a key (or key prefix, when used for listing).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `s3://bucket/key`. The scheme is optional and the key may be empty.
    pub fn parse(url: &str) -> Option<Self> {
        let trimmed = url.trim();
        let rest = trimmed.strip_prefix("s3://").unwrap_or(trimmed);
        let (bucket, key) = match rest.split_once('/') {
            Some((bucket, key)) => (bucket, key.trim_start_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return None;
        }
        Some(Self::new(bucket, key))
    }

    /// Same bucket, different key.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for S3Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// One listed object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Result of a metadata-only probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    pub etag: Option<String>,
}

/// A part accepted by the destination, as passed to `complete_multipart`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Sequential byte stream over a source object.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(S3Location),

    #[error("{operation} failed for {location}: {message}")]
    Request {
        operation: &'static str,
        location: S3Location,
        message: String,
    },

    #[error("{operation} response for {location} is missing {field}")]
    MissingField {
        operation: &'static str,
        location: S3Location,
        field: &'static str,
    },
}

/// The storage operations the copy engine needs from one credential scope.
///
/// Implementations must be safe to share between workers: every method takes
/// `&self` and holds no per-transfer state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object whose key starts with `prefix.key`, following pagination to the end.
    async fn list_objects(&self, prefix: &S3Location) -> Result<Vec<ObjectEntry>, StoreError>;

    async fn head_object(&self, location: &S3Location) -> Result<ObjectHead, StoreError>;

    async fn open_read(&self, location: &S3Location) -> Result<ObjectReader, StoreError>;

    /// Single-request write of a zero-byte object.
    async fn put_empty(&self, location: &S3Location) -> Result<(), StoreError>;

    /// Returns the upload id.
    async fn create_multipart(&self, location: &S3Location) -> Result<String, StoreError>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        location: &S3Location,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError>;

    async fn complete_multipart(
        &self,
        location: &S3Location,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StoreError>;

    async fn abort_multipart(&self, location: &S3Location, upload_id: &str)
    -> Result<(), StoreError>;
}
