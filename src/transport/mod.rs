pub mod http;
pub mod types;

use crate::error::{JobError, TransientPollError};
use async_trait::async_trait;

pub use http::HttpTransport;
pub use types::{FilePart, JobSnapshot, JobStatus, JobTicket, SubmitPayload};

/// Wire access to the job queue. `submit` creates a job; `fetch_status` is one poll.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn submit(&self, endpoint: &str, payload: SubmitPayload) -> Result<JobTicket, JobError>;
    async fn fetch_status(
        &self,
        status_endpoint: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, TransientPollError>;
}
