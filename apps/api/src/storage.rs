//! CV storage: original uploads go to S3-compatible blob storage, and their
//! text is extracted for analysis.

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::parser::EXTRACTION_FAILED_MARKERS;

#[async_trait]
pub trait CvStore: Send + Sync {
    async fn put_cv(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;
}

pub struct S3CvStore {
    client: S3Client,
    bucket: String,
}

impl S3CvStore {
    pub fn new(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl CvStore for S3CvStore {
    async fn put_cv(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded CV to s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

/// `cvs/{project}/{random}-{sanitized file name}`
pub fn cv_object_key(project_id: Uuid, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.trim_matches('_').is_empty() {
        "cv".to_string()
    } else {
        safe
    };
    format!("cvs/{project_id}/{}-{safe}", Uuid::new_v4())
}

/// Text of an uploaded CV. PDFs go through `pdf-extract`; anything else must be
/// UTF-8. Failures yield a marker string so the analysis falls back predictably.
pub async fn extract_cv_text(body: Bytes) -> String {
    if body.starts_with(b"%PDF") {
        let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&body))
            .await;
        return match extracted {
            Ok(Ok(text)) => normalize_whitespace(&text),
            Ok(Err(e)) => {
                warn!("PDF text extraction failed: {e}");
                failure_marker(&e.to_string())
            }
            Err(e) => {
                warn!("PDF extraction task failed: {e}");
                failure_marker("extraction task aborted")
            }
        };
    }

    match std::str::from_utf8(&body) {
        Ok(text) => normalize_whitespace(text),
        Err(_) => failure_marker("unsupported file format"),
    }
}

fn failure_marker(reason: &str) -> String {
    format!("{} {reason}", EXTRACTION_FAILED_MARKERS[0])
}

/// Collapses runs of blank lines and trailing spaces left by PDF layout.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
