use crate::{
    client::AsyncJobClient,
    config::{self, Config},
    error::{JobError, ValidationError},
    poll::{CancelHandle, JobOutcome, PollOptions, ProgressFn},
    transport::{JobTicket, JobTransport, SubmitPayload},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

const MESSAGE_KEYS: &[&str] = &["message", "reply", "response", "content"];
const BLOCK_KEYS: &[&str] = &["blocks", "richContent", "rich_content", "attachments"];
const BLOCK_CONTENT_KEYS: &[&str] = &["content", "latex", "text"];

/// One student turn sent to the tutor agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ChatTurn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Formatted content attached to a reply, e.g. a worked expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RichBlock {
    pub kind: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatReply {
    pub message: String,
    pub blocks: Vec<RichBlock>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatExchange {
    pub job_id: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub started: String,
    pub reply: ChatReply,
}

/// Reads the agent's result. Missing pieces become empty rather than errors.
pub fn decode_reply(raw: &Value) -> ChatReply {
    match raw {
        Value::String(s) => ChatReply {
            message: s.trim().to_string(),
            ..Default::default()
        },
        Value::Object(map) => ChatReply {
            message: first_str(map, MESSAGE_KEYS).unwrap_or_default(),
            blocks: BLOCK_KEYS
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_array))
                .map(|items| items.iter().filter_map(rich_block).collect::<Vec<_>>())
                .unwrap_or_default(),
            session_id: first_str(map, &["sessionId", "session_id"]),
        },
        _ => ChatReply::default(),
    }
}

fn rich_block(v: &Value) -> Option<RichBlock> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(RichBlock {
            kind: "text".into(),
            content: s.trim().to_string(),
        }),
        Value::Object(map) => {
            let content = first_str(map, BLOCK_CONTENT_KEYS)?;
            let kind = first_str(map, &["type", "kind"]).unwrap_or_else(|| {
                if map.contains_key("latex") {
                    "math".into()
                } else {
                    "text".into()
                }
            });
            Some(RichBlock { kind, content })
        }
        _ => None,
    }
}

fn first_str(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

/// Sends chat turns to the tutor agent and waits for the reply.
pub struct ChatTurnSubmitter<T: JobTransport> {
    client: AsyncJobClient<T>,
    chat: config::Chat,
    progress: config::Progress,
}

impl<T: JobTransport> ChatTurnSubmitter<T> {
    pub fn new(client: AsyncJobClient<T>, cfg: &Config) -> Self {
        Self {
            client,
            chat: cfg.chat.clone(),
            progress: cfg.progress.clone(),
        }
    }

    pub fn client(&self) -> &AsyncJobClient<T> {
        &self.client
    }

    pub async fn submit(&self, mut turn: ChatTurn) -> Result<JobTicket, JobError> {
        if turn.message.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        if turn.grade_level.is_none() && !self.chat.grade_level.is_empty() {
            turn.grade_level = Some(self.chat.grade_level.clone());
        }
        let body = serde_json::to_value(&turn)
            .map_err(|e| JobError::Submission(format!("encoding chat turn: {e}")))?;
        self.client
            .submit(&self.chat.submit_path, SubmitPayload::Json(body))
            .await
    }

    pub fn poll_options(&self, ticket: Option<&JobTicket>) -> PollOptions {
        let interval = ticket
            .and_then(|t| t.poll_interval)
            .filter(|_| self.progress.honor_interval_hint)
            .unwrap_or_else(|| config::millis(self.chat.interval_ms));
        PollOptions::new(interval)
            .max_attempts(config::nonzero_attempts(self.chat.max_attempts))
            .max_elapsed(config::nonzero_seconds(self.chat.max_elapsed_seconds))
            .clamp_regressions(self.progress.clamp_regressions)
    }

    pub async fn ask(
        &self,
        turn: ChatTurn,
        on_progress: Option<ProgressFn>,
        signal: Option<CancelHandle>,
    ) -> Result<ChatExchange, JobError> {
        let ticket = self.submit(turn).await?;
        let options = self
            .poll_options(Some(&ticket))
            .progress_fn(on_progress)
            .signal(signal);
        let outcome = self
            .client
            .poll_until_terminal(&self.chat.status_path, &ticket.job_id, options)
            .await?;
        Ok(exchange(outcome, ticket.session_id))
    }

    pub async fn watch(
        &self,
        job_id: &str,
        on_progress: Option<ProgressFn>,
        signal: Option<CancelHandle>,
    ) -> Result<ChatExchange, JobError> {
        let options = self.poll_options(None).progress_fn(on_progress).signal(signal);
        let outcome = self
            .client
            .poll_until_terminal(&self.chat.status_path, job_id, options)
            .await?;
        Ok(exchange(outcome, None))
    }
}

fn exchange(outcome: JobOutcome, ticket_session: Option<String>) -> ChatExchange {
    let mut reply = decode_reply(&outcome.result);
    if reply.session_id.is_none() {
        reply.session_id = ticket_session;
    }
    if reply.message.is_empty() && reply.blocks.is_empty() {
        warn!("chat job {} completed with an empty reply", outcome.job_id);
    }
    info!(
        "chat job {} replied: {} chars, {} blocks",
        outcome.job_id,
        reply.message.len(),
        reply.blocks.len()
    );
    ChatExchange {
        job_id: outcome.job_id,
        attempts: outcome.attempts,
        elapsed: outcome.elapsed,
        started: outcome.started,
        reply,
    }
}
