#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutor_jobs::{
    JobError, ProgressEvent, TransientPollError,
    poll::ProgressFn,
    transport::{JobSnapshot, JobStatus, JobTicket, JobTransport, SubmitPayload},
};

#[derive(Debug, Clone)]
pub enum Step {
    Snap(JobSnapshot),
    Fail(&'static str),
}

pub fn waiting(progress: f64) -> Step {
    Step::Snap(JobSnapshot {
        status: JobStatus::Waiting,
        progress: Some(progress),
        result: None,
        error: None,
    })
}

pub fn active(progress: f64) -> Step {
    Step::Snap(JobSnapshot {
        status: JobStatus::Active,
        progress: Some(progress),
        result: None,
        error: None,
    })
}

pub fn bare(status: JobStatus) -> Step {
    Step::Snap(JobSnapshot {
        status,
        progress: None,
        result: None,
        error: None,
    })
}

pub fn completed(result: Value) -> Step {
    Step::Snap(JobSnapshot {
        status: JobStatus::Completed,
        progress: Some(100.0),
        result: Some(result),
        error: None,
    })
}

pub fn failed(msg: &str) -> Step {
    Step::Snap(JobSnapshot {
        status: JobStatus::Failed,
        progress: None,
        result: None,
        error: Some(msg.to_string()),
    })
}

/// Plays back `steps` one per poll; the last step repeats forever.
pub struct ScriptedTransport {
    steps: Vec<Step>,
    pub polls: Arc<AtomicU32>,
    pub submits: Arc<AtomicU32>,
    pub submitted: Arc<Mutex<Vec<Value>>>,
    ticket: JobTicket,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty());
        Self {
            steps,
            polls: Arc::new(AtomicU32::new(0)),
            submits: Arc::new(AtomicU32::new(0)),
            submitted: Arc::new(Mutex::new(Vec::new())),
            ticket: JobTicket {
                job_id: "job-1".into(),
                session_id: None,
                poll_interval: None,
            },
        }
    }

    pub fn with_ticket(mut self, ticket: JobTicket) -> Self {
        self.ticket = ticket;
        self
    }
}

#[async_trait]
impl JobTransport for ScriptedTransport {
    async fn submit(&self, _endpoint: &str, payload: SubmitPayload) -> Result<JobTicket, JobError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let recorded = match payload {
            SubmitPayload::Json(v) => v,
            SubmitPayload::File(f) => json!({
                "field": f.field,
                "file_name": f.file_name,
                "mime_type": f.mime_type,
                "bytes": f.bytes.len(),
            }),
        };
        self.submitted.lock().unwrap().push(recorded);
        Ok(self.ticket.clone())
    }

    async fn fetch_status(
        &self,
        _status_endpoint: &str,
        _job_id: &str,
    ) -> Result<JobSnapshot, TransientPollError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) as usize;
        match &self.steps[n.min(self.steps.len() - 1)] {
            Step::Snap(s) => Ok(s.clone()),
            Step::Fail(msg) => Err(TransientPollError::new(*msg)),
        }
    }
}

/// Every status request hangs for `delay` before answering `active(50)`.
pub struct StalledTransport {
    delay: Duration,
    pub polls: Arc<AtomicU32>,
}

impl StalledTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            polls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl JobTransport for StalledTransport {
    async fn submit(&self, _endpoint: &str, _payload: SubmitPayload) -> Result<JobTicket, JobError> {
        Err(JobError::Submission("not used".into()))
    }

    async fn fetch_status(
        &self,
        _status_endpoint: &str,
        _job_id: &str,
    ) -> Result<JobSnapshot, TransientPollError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(JobSnapshot {
            status: JobStatus::Active,
            progress: Some(50.0),
            result: None,
            error: None,
        })
    }
}

/// Each job id completes on its own poll count, with `{"job": id}` as the result.
pub struct PerJobTransport {
    finish_at: HashMap<String, u32>,
    pub polls: Arc<Mutex<HashMap<String, u32>>>,
}

impl PerJobTransport {
    pub fn new(jobs: &[(&str, u32)]) -> Self {
        Self {
            finish_at: jobs.iter().map(|(id, n)| (id.to_string(), *n)).collect(),
            polls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl JobTransport for PerJobTransport {
    async fn submit(&self, _endpoint: &str, _payload: SubmitPayload) -> Result<JobTicket, JobError> {
        Err(JobError::Submission("not used".into()))
    }

    async fn fetch_status(
        &self,
        _status_endpoint: &str,
        job_id: &str,
    ) -> Result<JobSnapshot, TransientPollError> {
        let n = {
            let mut polls = self.polls.lock().unwrap();
            let n = polls.entry(job_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let done = self.finish_at.get(job_id).is_some_and(|at| n >= *at);
        Ok(JobSnapshot {
            status: if done { JobStatus::Completed } else { JobStatus::Active },
            progress: Some(if done { 100.0 } else { 10.0 }),
            result: done.then(|| json!({ "job": job_id })),
            error: None,
        })
    }
}

/// A progress callback plus the list it records into.
pub fn recorder() -> (ProgressFn, Arc<Mutex<Vec<ProgressEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let f: ProgressFn = Box::new(move |ev: &ProgressEvent| sink.lock().unwrap().push(ev.clone()));
    (f, seen)
}

pub fn percents(seen: &Arc<Mutex<Vec<ProgressEvent>>>) -> Vec<u8> {
    seen.lock().unwrap().iter().map(|e| e.percent).collect()
}
