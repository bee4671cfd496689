use thiserror::Error;

/// Rejected input. Raised before anything touches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("file is empty")]
    EmptyFile,
    #[error("message is empty")]
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    #[error("job submission failed: {0}")]
    Submission(String),
    #[error("job {job_id} failed: {message}")]
    Failed { job_id: String, message: String },
    #[error("job {job_id} did not finish after {attempts} polls")]
    Timeout {
        job_id: String,
        attempts: u32,
        last_error: Option<String>,
    },
    #[error("polling cancelled for job {job_id}")]
    Cancelled { job_id: String },
    #[error("job {0} is already being polled")]
    AlreadyPolling(String),
}

impl JobError {
    /// Text meant for the person waiting on the job. `None` for a cancel,
    /// which the caller asked for and should not be reported back.
    pub fn user_message(&self) -> Option<String> {
        match self {
            JobError::Validation(e) => Some(e.to_string()),
            JobError::Submission(_) => Some("Could not start the job. Please try again.".into()),
            JobError::Failed { message, .. } => Some(message.clone()),
            JobError::Timeout { .. } => {
                Some("This is taking too long. Please try again in a moment.".into())
            }
            JobError::Cancelled { .. } => None,
            JobError::AlreadyPolling(_) => Some("This job is already being tracked.".into()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled { .. })
    }
}

/// One failed poll. Retried inside the session; only surfaces as the
/// `last_error` of a `Timeout`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransientPollError(pub String);

impl TransientPollError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
