use crate::{
    error::JobError,
    poll::{ActiveJobs, JobOutcome, PollOptions, PollSession},
    transport::{JobTicket, JobTransport, SubmitPayload},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Submits work to the job queue and polls it to completion.
///
/// Cheap to clone; clones share the transport and the active-job registry, so
/// the one-session-per-job rule holds across all of them.
pub struct AsyncJobClient<T: JobTransport> {
    transport: Arc<T>,
    active: ActiveJobs,
}

impl<T: JobTransport> Clone for AsyncJobClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            active: self.active.clone(),
        }
    }
}

impl<T: JobTransport> AsyncJobClient<T> {
    pub fn new(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<T>) -> Self {
        Self {
            transport,
            active: ActiveJobs::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn submit(
        &self,
        endpoint: &str,
        payload: SubmitPayload,
    ) -> Result<JobTicket, JobError> {
        match self.transport.submit(endpoint, payload).await {
            Ok(ticket) => {
                info!(
                    "submitted job {} to {endpoint} session={:?}",
                    ticket.job_id, ticket.session_id
                );
                Ok(ticket)
            }
            Err(err) => {
                warn!("submit to {endpoint} failed: {err}");
                Err(err)
            }
        }
    }

    /// Open a session for `job_id`. Fails if another session for the same job is live.
    pub fn session(
        &self,
        status_endpoint: &str,
        job_id: &str,
        options: PollOptions,
    ) -> Result<PollSession<T>, JobError> {
        let registration = self.active.acquire(job_id)?;
        Ok(PollSession::new(
            Arc::clone(&self.transport),
            status_endpoint,
            job_id,
            options,
            registration,
        ))
    }

    pub async fn poll_until_terminal(
        &self,
        status_endpoint: &str,
        job_id: &str,
        options: PollOptions,
    ) -> Result<JobOutcome, JobError> {
        self.session(status_endpoint, job_id, options)?.run().await
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.active.contains(job_id)
    }
}
