use crate::store::{ObjectEntry, ObjectHead, ObjectReader, ObjectStore, S3Location, StoreError, UploadedPart};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_types::error::display::DisplayErrorContext;
use bytes::Bytes;

/// Page size requested from ListObjectsV2 (the service maximum).
const LIST_PAGE_SIZE: i32 = 1000;

/// `ObjectStore` backed by one S3 client, i.e. one credential scope and region.
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn request_error<E>(operation: &'static str, location: &S3Location, err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Request {
        operation,
        location: location.clone(),
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects(&self, prefix: &S3Location) -> Result<Vec<ObjectEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&prefix.bucket)
                .prefix(&prefix.key)
                .max_keys(LIST_PAGE_SIZE);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request
                .send()
                .await
                .map_err(|e| request_error("ListObjectsV2", prefix, e))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    entries.push(ObjectEntry {
                        key: key.to_string(),
                        size: object.size().unwrap_or(0).max(0) as u64,
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    return Err(StoreError::MissingField {
                        operation: "ListObjectsV2",
                        location: prefix.clone(),
                        field: "NextContinuationToken",
                    });
                }
            } else {
                break;
            }
        }

        Ok(entries)
    }

    async fn head_object(&self, location: &S3Location) -> Result<ObjectHead, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
        {
            Ok(output) => Ok(ObjectHead {
                size: output.content_length.unwrap_or(0).max(0) as u64,
                etag: output.e_tag,
            }),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    return Err(StoreError::NotFound(location.clone()));
                }
                Err(request_error("HeadObject", location, service_error))
            }
        }
    }

    async fn open_read(&self, location: &S3Location) -> Result<ObjectReader, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| request_error("GetObject", location, e))?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn put_empty(&self, location: &S3Location) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .body(ByteStream::from_static(b""))
            .send()
            .await
            .map_err(|e| request_error("PutObject", location, e))?;
        Ok(())
    }

    async fn create_multipart(&self, location: &S3Location) -> Result<String, StoreError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", location, e))?;

        response.upload_id.ok_or_else(|| StoreError::MissingField {
            operation: "CreateMultipartUpload",
            location: location.clone(),
            field: "UploadId",
        })
    }

    async fn upload_part(
        &self,
        location: &S3Location,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, StoreError> {
        let response = self
            .client
            .upload_part()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", location, e))?;

        response.e_tag.ok_or_else(|| StoreError::MissingField {
            operation: "UploadPart",
            location: location.clone(),
            field: "ETag",
        })
    }

    async fn complete_multipart(
        &self,
        location: &S3Location,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StoreError> {
        let parts = parts
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", location, e))?;

        Ok(())
    }

    async fn abort_multipart(
        &self,
        location: &S3Location,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_error("AbortMultipartUpload", location, e))?;

        Ok(())
    }
}
