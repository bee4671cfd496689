use super::{
    JobTransport,
    types::{JobSnapshot, JobTicket, StatusEnvelope, SubmitEnvelope, SubmitPayload, error_message},
};
use crate::{
    config::Config,
    error::{JobError, TransientPollError},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url, multipart};
use std::time::Duration;
use tracing::{debug, warn};

/// `JobTransport` over the backend's REST envelope (`{success, data, error}`).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_options(
            &cfg.api.base_url,
            cfg.api_token(),
            Duration::from_secs(cfg.api.request_timeout_seconds.max(1)),
            &cfg.api.user_agent,
        )
    }

    pub fn with_options(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        Url::parse(base_url).with_context(|| format!("invalid api.base_url: {base_url}"))?;
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .with_context(|| "building HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn status_url(&self, status_endpoint: &str, job_id: &str) -> Result<Url, TransientPollError> {
        let mut url = Url::parse(&self.url(status_endpoint))
            .map_err(|e| TransientPollError::new(format!("bad status url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TransientPollError::new("status url cannot take a path"))?
            .pop_if_empty()
            .push(job_id);
        Ok(url)
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => rb.bearer_auth(t),
            None => rb,
        }
    }

    /// GET `path` relative to the base url and return the HTTP status code.
    pub async fn health(&self, path: &str) -> Result<u16> {
        let resp = self
            .authorize(self.client.get(self.url(path)))
            .send()
            .await
            .with_context(|| format!("GET {}", self.url(path)))?;
        Ok(resp.status().as_u16())
    }
}

#[async_trait]
impl JobTransport for HttpTransport {
    async fn submit(&self, endpoint: &str, payload: SubmitPayload) -> Result<JobTicket, JobError> {
        let url = self.url(endpoint);
        let rb = self.authorize(self.client.post(&url));
        let rb = match payload {
            SubmitPayload::Json(body) => rb.json(&body),
            SubmitPayload::File(file) => {
                debug!(
                    "multipart upload field={} file={} mime={} bytes={}",
                    file.field,
                    file.file_name,
                    file.mime_type,
                    file.bytes.len()
                );
                let part = multipart::Part::bytes(file.bytes)
                    .file_name(file.file_name)
                    .mime_str(&file.mime_type)
                    .map_err(|e| JobError::Submission(format!("bad mime type: {e}")))?;
                rb.multipart(multipart::Form::new().part(file.field, part))
            }
        };

        let resp = rb
            .send()
            .await
            .map_err(|e| JobError::Submission(format!("POST {url}: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| JobError::Submission(format!("reading response from {url}: {e}")))?;

        if !status.is_success() {
            let msg = serde_json::from_str::<SubmitEnvelope>(&body)
                .ok()
                .and_then(|env| error_message(env.error.as_ref()))
                .unwrap_or(body);
            warn!("submit to {url} rejected: {status}");
            return Err(JobError::Submission(format!("{status}: {msg}")));
        }

        let env: SubmitEnvelope = serde_json::from_str(&body)
            .map_err(|e| JobError::Submission(format!("malformed submit response: {e}")))?;
        env.into_ticket().map_err(JobError::Submission)
    }

    async fn fetch_status(
        &self,
        status_endpoint: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, TransientPollError> {
        let url = self.status_url(status_endpoint, job_id)?;
        let resp = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| TransientPollError::new(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransientPollError::new(format!("GET {url}: {status}")));
        }
        let env: StatusEnvelope = resp
            .json()
            .await
            .map_err(|e| TransientPollError::new(format!("malformed status response: {e}")))?;
        env.into_snapshot()
    }
}
