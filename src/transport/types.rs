use crate::error::TransientPollError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// What the server hands back when a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub job_id: String,
    pub session_id: Option<String>,
    pub poll_interval: Option<Duration>,
}

/// One decoded status document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SubmitPayload {
    Json(Value),
    File(FilePart),
}

#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<SubmitData>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitData {
    #[serde(default)]
    pub job_id: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<StatusData>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl SubmitEnvelope {
    pub fn into_ticket(self) -> Result<JobTicket, String> {
        if !self.success {
            return Err(error_message(self.error.as_ref())
                .unwrap_or_else(|| "server reported success=false".to_string()));
        }
        let data = self.data.ok_or_else(|| "response has no data".to_string())?;
        let job_id = match data.job_id {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err("response has no jobId".to_string()),
        };
        Ok(JobTicket {
            job_id,
            session_id: data.session_id.filter(|s| !s.is_empty()),
            poll_interval: data
                .poll_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        })
    }
}

impl StatusEnvelope {
    pub fn into_snapshot(self) -> Result<JobSnapshot, TransientPollError> {
        if !self.success {
            let msg = error_message(self.error.as_ref())
                .unwrap_or_else(|| "server reported success=false".to_string());
            return Err(TransientPollError::new(msg));
        }
        let data = self
            .data
            .ok_or_else(|| TransientPollError::new("status response has no data"))?;
        Ok(JobSnapshot {
            status: data.status,
            progress: data.progress.as_ref().and_then(number_lenient),
            result: data.result,
            error: error_message(data.error.as_ref()),
        })
    }
}

/// Accepts either `"message"` or `{ "message": "..." }`.
pub fn error_message(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn number_lenient(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}
