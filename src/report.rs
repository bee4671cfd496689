use crate::{progress::JobKind, util::now_rfc3339};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub kind: JobKind,
    pub status: &'static str,
    pub attempts: u32,
    pub elapsed_ms: u128,
    pub started: String,
    pub finished: String,
}

impl JobSummary {
    pub fn completed(
        kind: JobKind,
        job_id: &str,
        attempts: u32,
        elapsed: Duration,
        started: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            status: "completed",
            attempts,
            elapsed_ms: elapsed.as_millis(),
            started: started.to_string(),
            finished: now_rfc3339(),
        }
    }
}
