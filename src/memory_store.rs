//! In-memory `ObjectStore` used by the engine tests.

use crate::store::{ObjectEntry, ObjectHead, ObjectReader, ObjectStore, S3Location, StoreError, UploadedPart};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Upload {
    location: Option<S3Location>,
    parts: BTreeMap<i32, Bytes>,
}

struct StoredObject {
    body: Bytes,
    etag: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: HashMap<String, Upload>,
    next_upload: usize,
    part_calls: Vec<(String, i32, usize)>,
    aborted: Vec<String>,
    put_empty_calls: usize,
    list_calls: usize,
    head_size_override: HashMap<String, u64>,
    fail_part: HashMap<String, i32>,
    fail_list: bool,
    page_size: usize,
    part_delay: Option<Duration>,
}

/// Objects live in a map keyed by (bucket, key); multipart uploads are
/// assembled from their parts on completion, like the real service.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    open_uploads: AtomicUsize,
    max_open_uploads: AtomicUsize,
    completed: AtomicUsize,
    hold_heads: Mutex<Option<(HashSet<String>, CancellationToken)>>,
}

fn etag_of(bytes: &[u8]) -> String {
    format!("\"{:x}\"", md5::compute(bytes))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                page_size: 1000,
                ..State::default()
            }),
            ..Self::default()
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        let body = body.into();
        let etag = etag_of(&body);
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.to_string(), key.to_string()), StoredObject { body, etag });
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Keys currently stored in `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Makes the upload of `part_number` for `key` fail.
    pub fn fail_part(&self, key: &str, part_number: i32) {
        self.state
            .lock()
            .unwrap()
            .fail_part
            .insert(key.to_string(), part_number);
    }

    /// HEAD of `key` reports `size` regardless of the stored body.
    pub fn override_head_size(&self, key: &str, size: u64) {
        self.state
            .lock()
            .unwrap()
            .head_size_override
            .insert(key.to_string(), size);
    }

    /// Every part upload takes `delay` before it is stored.
    pub fn stall_parts(&self, delay: Duration) {
        self.state.lock().unwrap().part_delay = Some(delay);
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().unwrap().page_size = page_size;
    }

    /// HEAD requests for `keys` wait until `release` is cancelled.
    pub fn hold_heads(&self, keys: HashSet<String>, release: CancellationToken) {
        *self.hold_heads.lock().unwrap() = Some((keys, release));
    }

    /// (key, part number, part length) for every UploadPart call, in call order.
    pub fn part_calls(&self) -> Vec<(String, i32, usize)> {
        self.state.lock().unwrap().part_calls.clone()
    }

    pub fn uploads_created(&self) -> usize {
        self.state.lock().unwrap().next_upload
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    pub fn put_empty_calls(&self) -> usize {
        self.state.lock().unwrap().put_empty_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn completed_uploads(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of multipart uploads open at the same time.
    pub fn max_open_uploads(&self) -> usize {
        self.max_open_uploads.load(Ordering::SeqCst)
    }

    fn request_error(operation: &'static str, location: &S3Location) -> StoreError {
        StoreError::Request {
            operation,
            location: location.clone(),
            message: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(&self, prefix: &S3Location) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(Self::request_error("ListObjectsV2", prefix));
        }
        let matching: Vec<ObjectEntry> = state
            .objects
            .iter()
            .filter(|((bucket, key), _)| *bucket == prefix.bucket && key.starts_with(&prefix.key))
            .map(|((_, key), object)| ObjectEntry {
                key: key.clone(),
                size: object.body.len() as u64,
            })
            .collect();
        // One call per page, as a paginating client would issue.
        state.list_calls += matching.len().div_ceil(state.page_size).max(1);
        Ok(matching)
    }

    async fn head_object(&self, location: &S3Location) -> Result<ObjectHead, StoreError> {
        let hold = self
            .hold_heads
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(keys, _)| keys.contains(&location.key))
            .map(|(_, release)| release.clone());
        if let Some(release) = hold {
            release.cancelled().await;
        }

        let state = self.state.lock().unwrap();
        let object = state
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .ok_or_else(|| StoreError::NotFound(location.clone()))?;
        let size = state
            .head_size_override
            .get(&location.key)
            .copied()
            .unwrap_or(object.body.len() as u64);
        Ok(ObjectHead {
            size,
            etag: Some(object.etag.clone()),
        })
    }

    async fn open_read(&self, location: &S3Location) -> Result<ObjectReader, StoreError> {
        let body = self
            .object(&location.bucket, &location.key)
            .ok_or_else(|| StoreError::NotFound(location.clone()))?;
        Ok(Box::pin(std::io::Cursor::new(body)))
    }

    async fn put_empty(&self, location: &S3Location) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.put_empty_calls += 1;
        state.objects.insert(
            (location.bucket.clone(), location.key.clone()),
            StoredObject {
                body: Bytes::new(),
                etag: etag_of(b""),
            },
        );
        Ok(())
    }

    async fn create_multipart(&self, location: &S3Location) -> Result<String, StoreError> {
        let open = self.open_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_uploads.fetch_max(open, Ordering::SeqCst);

        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            id.clone(),
            Upload {
                location: Some(location.clone()),
                ..Upload::default()
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        location: &S3Location,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        tokio::task::yield_now().await;
        let delay = self.state.lock().unwrap().part_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state
            .part_calls
            .push((location.key.clone(), part_number, body.len()));
        if state.fail_part.get(&location.key) == Some(&part_number) {
            return Err(Self::request_error("UploadPart", location));
        }
        let etag = etag_of(&body);
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| Self::request_error("UploadPart", location))?;
        upload.parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        location: &S3Location,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StoreError> {
        self.open_uploads.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(upload_id)
            .ok_or_else(|| Self::request_error("CompleteMultipartUpload", location))?;
        if upload.location.as_ref() != Some(location) {
            return Err(Self::request_error("CompleteMultipartUpload", location));
        }

        let mut assembled = Vec::new();
        let mut digests = Vec::new();
        for part in &parts {
            let body = upload
                .parts
                .get(&part.part_number)
                .ok_or_else(|| Self::request_error("CompleteMultipartUpload", location))?;
            if etag_of(body) != part.etag {
                return Err(Self::request_error("CompleteMultipartUpload", location));
            }
            digests.extend_from_slice(&md5::compute(body).0);
            assembled.extend_from_slice(body);
        }
        let etag = format!("\"{:x}-{}\"", md5::compute(&digests), parts.len());

        state.objects.insert(
            (location.bucket.clone(), location.key.clone()),
            StoredObject {
                body: Bytes::from(assembled),
                etag,
            },
        );
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abort_multipart(
        &self,
        location: &S3Location,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.open_uploads.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.uploads.remove(upload_id);
        state.aborted.push(location.key.clone());
        Ok(())
    }
}
