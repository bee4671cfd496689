pub mod normalize;

use crate::{
    client::AsyncJobClient,
    config::{self, Config},
    error::{JobError, ValidationError},
    poll::{CancelHandle, JobOutcome, PollOptions, ProgressFn},
    transport::{FilePart, JobTicket, JobTransport, SubmitPayload},
    util::{mime_for_path, sha256_hex},
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub use normalize::{BlockKind, OcrBlock, OcrResult, normalize};

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Reads `path`; the MIME type comes from the extension unless overridden.
    /// Files larger than `max_bytes` are rejected before any bytes are read.
    pub fn from_path(path: &Path, mime_override: Option<&str>, max_bytes: u64) -> Result<Self> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("stat image: {}", path.display()))?
            .len();
        if size > max_bytes {
            return Err(ValidationError::TooLarge {
                size,
                limit: max_bytes,
            }
            .into());
        }
        let bytes =
            std::fs::read(path).with_context(|| format!("reading image: {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime_type = mime_override
            .map(str::to_string)
            .unwrap_or_else(|| mime_for_path(path).to_string());
        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn sha256(&self) -> String {
        sha256_hex(&self.bytes)
    }
}

/// Checks type, size and emptiness. Pure: never touches the network.
pub fn validate(cfg: &config::Ocr, upload: &ImageUpload) -> Result<(), ValidationError> {
    if upload.bytes.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    let mime = canonical_mime(&upload.mime_type);
    if !cfg
        .allowed_mime_types
        .iter()
        .any(|allowed| canonical_mime(allowed) == mime)
    {
        return Err(ValidationError::UnsupportedType(upload.mime_type.clone()));
    }
    if upload.size() > cfg.max_file_bytes {
        return Err(ValidationError::TooLarge {
            size: upload.size(),
            limit: cfg.max_file_bytes,
        });
    }
    Ok(())
}

fn canonical_mime(raw: &str) -> String {
    let base = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => base,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrCapture {
    pub job_id: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub started: String,
    pub result: OcrResult,
}

impl OcrCapture {
    fn from_outcome(outcome: JobOutcome) -> Self {
        let result = normalize(&outcome.result);
        debug!(
            "ocr job {} normalized: blocks={} quality={:?}",
            outcome.job_id,
            result.blocks.len(),
            result.quality_score
        );
        Self {
            job_id: outcome.job_id,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            started: outcome.started,
            result,
        }
    }
}

/// Uploads an image for OCR and follows the job to its normalized result.
pub struct CaptureSubmitter<T: JobTransport> {
    client: AsyncJobClient<T>,
    ocr: config::Ocr,
    progress: config::Progress,
}

impl<T: JobTransport> CaptureSubmitter<T> {
    pub fn new(client: AsyncJobClient<T>, cfg: &Config) -> Self {
        Self {
            client,
            ocr: cfg.ocr.clone(),
            progress: cfg.progress.clone(),
        }
    }

    pub fn client(&self) -> &AsyncJobClient<T> {
        &self.client
    }

    pub fn validate(&self, upload: &ImageUpload) -> Result<(), ValidationError> {
        validate(&self.ocr, upload)
    }

    pub async fn submit(&self, upload: ImageUpload) -> Result<JobTicket, JobError> {
        self.validate(&upload)?;
        info!(
            "ocr upload file={} mime={} bytes={} sha256={}",
            upload.file_name,
            upload.mime_type,
            upload.size(),
            upload.sha256()
        );
        let payload = SubmitPayload::File(FilePart {
            field: self.ocr.form_field.clone(),
            file_name: upload.file_name,
            mime_type: upload.mime_type,
            bytes: upload.bytes,
        });
        self.client.submit(&self.ocr.submit_path, payload).await
    }

    pub fn poll_options(&self, ticket: Option<&JobTicket>) -> PollOptions {
        let interval = ticket
            .and_then(|t| t.poll_interval)
            .filter(|_| self.progress.honor_interval_hint)
            .unwrap_or_else(|| config::millis(self.ocr.interval_ms));
        PollOptions::new(interval)
            .max_attempts(config::nonzero_attempts(self.ocr.max_attempts))
            .max_elapsed(config::nonzero_seconds(self.ocr.max_elapsed_seconds))
            .clamp_regressions(self.progress.clamp_regressions)
    }

    /// Validate, upload, poll, normalize.
    pub async fn capture(
        &self,
        upload: ImageUpload,
        on_progress: Option<ProgressFn>,
        signal: Option<CancelHandle>,
    ) -> Result<OcrCapture, JobError> {
        let ticket = self.submit(upload).await?;
        let options = self
            .poll_options(Some(&ticket))
            .progress_fn(on_progress)
            .signal(signal);
        let outcome = self
            .client
            .poll_until_terminal(&self.ocr.status_path, &ticket.job_id, options)
            .await?;
        Ok(OcrCapture::from_outcome(outcome))
    }

    /// Follow an OCR job that was submitted elsewhere.
    pub async fn watch(
        &self,
        job_id: &str,
        on_progress: Option<ProgressFn>,
        signal: Option<CancelHandle>,
    ) -> Result<OcrCapture, JobError> {
        let options = self.poll_options(None).progress_fn(on_progress).signal(signal);
        let outcome = self
            .client
            .poll_until_terminal(&self.ocr.status_path, job_id, options)
            .await?;
        Ok(OcrCapture::from_outcome(outcome))
    }
}
