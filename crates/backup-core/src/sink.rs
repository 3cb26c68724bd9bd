//! Object sink: the S3-compatible object store collaborator.
//!
//! `upload` streams an [`AsyncRead`] to completion into an object, using a
//! multipart upload so the full artifact is never buffered in memory.
//! `download` streams an object into an [`AsyncWrite`] sequentially. Both
//! respect cancellation promptly.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Parts smaller than this (besides the final one) are rejected by S3;
/// buffer at least this many bytes before starting a part upload.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("s3 error: {0}")]
    S3(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation canceled")]
    Canceled,
}

impl<E: std::fmt::Debug + std::fmt::Display + 'static> From<aws_sdk_s3::error::SdkError<E>>
    for SinkError
{
    fn from(e: aws_sdk_s3::error::SdkError<E>) -> Self {
        SinkError::S3(e.to_string())
    }
}

#[async_trait]
pub trait ObjectSink: Send + Sync {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        path: &str,
        reader: impl AsyncRead + Unpin + Send + 'async_trait,
    ) -> Result<(), SinkError>;

    async fn download(
        &self,
        cancel: &CancellationToken,
        path: &str,
        writer: impl AsyncWrite + Unpin + Send + 'async_trait,
    ) -> Result<(), SinkError>;
}

pub struct S3Sink {
    client: Client,
    bucket: String,
}

impl S3Sink {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectSink for S3Sink {
    async fn upload(
        &self,
        cancel: &CancellationToken,
        path: &str,
        mut reader: impl AsyncRead + Unpin + Send + 'async_trait,
    ) -> Result<(), SinkError> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256)
            .send()
            .await?;
        let upload_id = create.upload_id().ok_or_else(|| {
            SinkError::S3("create_multipart_upload returned no upload id".to_string())
        })?;

        let result = self.upload_parts(cancel, path, upload_id, &mut reader).await;

        match result {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await?;
                Ok(())
            }
            Err(e) => {
                // Best-effort cleanup; the artifact is not considered valid
                // regardless of whether this abort succeeds.
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(path)
                    .upload_id(upload_id)
                    .send()
                    .await;
                Err(e)
            }
        }
    }

    async fn download(
        &self,
        cancel: &CancellationToken,
        path: &str,
        mut writer: impl AsyncWrite + Unpin + Send + 'async_trait,
    ) -> Result<(), SinkError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await?;

        let mut body = resp.body;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SinkError::Canceled),
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => writer.write_all(&bytes).await?,
                        Some(Err(e)) => return Err(SinkError::S3(e.to_string())),
                        None => break,
                    }
                }
            }
        }
        writer.shutdown().await?;
        Ok(())
    }
}

impl S3Sink {
    async fn upload_parts(
        &self,
        cancel: &CancellationToken,
        path: &str,
        upload_id: &str,
        reader: &mut (impl AsyncRead + Unpin + Send),
    ) -> Result<Vec<CompletedPart>, SinkError> {
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        let mut buf = vec![0u8; MIN_PART_SIZE];
        let mut filled = 0usize;

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SinkError::Canceled),
                n = reader.read(&mut buf[filled..]) => n?,
            };

            if n == 0 {
                if filled > 0 {
                    parts.push(
                        self.upload_one_part(path, upload_id, part_number, buf[..filled].to_vec())
                            .await?,
                    );
                }
                return Ok(parts);
            }

            filled += n;
            if filled == buf.len() {
                parts.push(
                    self.upload_one_part(path, upload_id, part_number, std::mem::take(&mut buf))
                        .await?,
                );
                buf = vec![0u8; MIN_PART_SIZE];
                filled = 0;
                part_number += 1;
            }
        }
    }

    async fn upload_one_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<CompletedPart, SinkError> {
        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(path)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(CompletedPart::builder()
            .part_number(part_number)
            .set_e_tag(resp.e_tag().map(str::to_string))
            .build())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    //! An in-memory [`ObjectSink`] fake for testing the engine without a
    //! real object store.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeSink {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_upload: Option<String>,
    }

    #[async_trait]
    impl ObjectSink for FakeSink {
        async fn upload(
            &self,
            _cancel: &CancellationToken,
            path: &str,
            mut reader: impl AsyncRead + Unpin + Send + 'async_trait,
        ) -> Result<(), SinkError> {
            if let Some(msg) = &self.fail_upload {
                // Still drain the reader so the writer side of the pipe
                // observes completion rather than hanging.
                let mut sink = tokio::io::sink();
                let _ = tokio::io::copy(&mut reader, &mut sink).await;
                return Err(SinkError::S3(msg.clone()));
            }
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            self.objects.lock().unwrap().insert(path.to_string(), buf);
            Ok(())
        }

        async fn download(
            &self,
            _cancel: &CancellationToken,
            path: &str,
            mut writer: impl AsyncWrite + Unpin + Send + 'async_trait,
        ) -> Result<(), SinkError> {
            let data = self
                .objects
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| SinkError::S3(format!("no such object: {path}")))?;
            writer.write_all(&data).await?;
            writer.shutdown().await?;
            Ok(())
        }
    }
}
