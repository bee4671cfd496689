//! The polling state machine shared by every job kind.
//!
//! A [`PollSession`] owns everything one in-flight job needs: its timer, its
//! attempt counter and budget, its cancellation token and its slot in the
//! client's active-job registry. `run` consumes the session, so all of that is
//! released on every exit path.

use crate::{
    error::{JobError, TransientPollError},
    transport::{JobSnapshot, JobStatus, JobTransport},
    util::now_rfc3339,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Raw progress as reported by the server, after clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub attempt: u32,
    pub percent: u8,
    pub status: JobStatus,
}

pub type ProgressFn = Box<dyn FnMut(&ProgressEvent) + Send>;

/// Cancels a poll session. Clones share the same token.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn child(&self) -> CancellationToken {
        self.token.child_token()
    }
}

pub struct PollOptions {
    pub interval: Duration,
    /// `None` polls until the job reaches a terminal state.
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<Duration>,
    pub clamp_regressions: bool,
    pub on_progress: Option<ProgressFn>,
    pub signal: Option<CancelHandle>,
}

impl PollOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            max_elapsed: None,
            clamp_regressions: true,
            on_progress: None,
            signal: None,
        }
    }

    pub fn max_attempts(mut self, n: Option<u32>) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn max_elapsed(mut self, d: Option<Duration>) -> Self {
        self.max_elapsed = d;
        self
    }

    pub fn clamp_regressions(mut self, on: bool) -> Self {
        self.clamp_regressions = on;
        self
    }

    pub fn on_progress(mut self, f: impl FnMut(&ProgressEvent) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn progress_fn(mut self, f: Option<ProgressFn>) -> Self {
        self.on_progress = f;
        self
    }

    pub fn signal(mut self, handle: Option<CancelHandle>) -> Self {
        self.signal = handle;
        self
    }
}

impl fmt::Debug for PollOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollOptions")
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .field("max_elapsed", &self.max_elapsed)
            .field("clamp_regressions", &self.clamp_regressions)
            .field("on_progress", &self.on_progress.is_some())
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

/// A completed job's raw result plus how long it took to get there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub attempts: u32,
    pub elapsed: Duration,
    pub started: String,
    pub result: Value,
}

/// Keeps reported progress inside `[0,100]` and, optionally, non-decreasing.
#[derive(Debug, Clone)]
pub struct ProgressGuard {
    high_water: Option<u8>,
    clamp_regressions: bool,
}

impl ProgressGuard {
    pub fn new(clamp_regressions: bool) -> Self {
        Self {
            high_water: None,
            clamp_regressions,
        }
    }

    pub fn observe(&mut self, raw: f64) -> u8 {
        let pct = if raw.is_finite() {
            raw.round().clamp(0.0, 100.0) as u8
        } else {
            0
        };
        let reported = match self.high_water {
            Some(prev) if self.clamp_regressions && pct < prev => {
                debug!("progress went backwards ({prev} -> {pct}); holding at {prev}");
                prev
            }
            _ => pct,
        };
        self.high_water = Some(self.high_water.map_or(reported, |p| p.max(reported)));
        reported
    }
}

/// Set of job ids with a live session.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveJobs {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveJobs {
    pub(crate) fn acquire(&self, job_id: &str) -> Result<ActiveJobGuard, JobError> {
        let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(job_id.to_string()) {
            return Err(JobError::AlreadyPolling(job_id.to_string()));
        }
        Ok(ActiveJobGuard {
            jobs: self.clone(),
            job_id: job_id.to_string(),
        })
    }

    pub(crate) fn contains(&self, job_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(job_id)
    }
}

#[derive(Debug)]
pub(crate) struct ActiveJobGuard {
    jobs: ActiveJobs,
    job_id: String,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.jobs
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

pub struct PollSession<T: JobTransport> {
    transport: Arc<T>,
    status_endpoint: String,
    job_id: String,
    attempt: u32,
    interval: Duration,
    max_attempts: Option<u32>,
    max_elapsed: Option<Duration>,
    started_at: Instant,
    started: String,
    cancel: CancellationToken,
    progress: ProgressGuard,
    on_progress: Option<ProgressFn>,
    last_error: Option<TransientPollError>,
    _registration: ActiveJobGuard,
}

impl<T: JobTransport> PollSession<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        status_endpoint: &str,
        job_id: &str,
        options: PollOptions,
        registration: ActiveJobGuard,
    ) -> Self {
        let cancel = match &options.signal {
            Some(handle) => handle.child(),
            None => CancellationToken::new(),
        };
        Self {
            transport,
            status_endpoint: status_endpoint.to_string(),
            job_id: job_id.to_string(),
            attempt: 0,
            interval: options.interval,
            max_attempts: options.max_attempts,
            max_elapsed: options.max_elapsed,
            started_at: Instant::now(),
            started: now_rfc3339(),
            cancel,
            progress: ProgressGuard::new(options.clamp_regressions),
            on_progress: options.on_progress,
            last_error: None,
            _registration: registration,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A handle that stops this session (and only this session).
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// Poll until the job is terminal, the budget is spent, or the session is cancelled.
    pub async fn run(mut self) -> Result<JobOutcome, JobError> {
        debug!(
            "poll session start job={} interval={:?} max_attempts={:?} max_elapsed={:?}",
            self.job_id, self.interval, self.max_attempts, self.max_elapsed
        );
        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            self.attempt += 1;
            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                r = self.transport.fetch_status(&self.status_endpoint, &self.job_id) => r,
            };

            // A cancel that lands while the request resolves still wins.
            if self.cancel.is_cancelled() {
                return Err(self.cancelled());
            }

            match fetched {
                Ok(snapshot) => {
                    debug!(
                        "poll job={} attempt={} status={} progress={:?}",
                        self.job_id,
                        self.attempt,
                        snapshot.status.as_str(),
                        snapshot.progress
                    );
                    if let Some(done) = self.on_snapshot(snapshot) {
                        return done;
                    }
                }
                Err(err) => {
                    warn!(
                        "poll job={} attempt={} failed: {err}",
                        self.job_id, self.attempt
                    );
                    self.last_error = Some(err);
                }
            }

            if self.budget_spent() {
                let last_error = self.last_error.take().map(|e| e.to_string());
                info!(
                    "job {} timed out after {} polls ({:?})",
                    self.job_id,
                    self.attempt,
                    self.started_at.elapsed()
                );
                return Err(JobError::Timeout {
                    job_id: self.job_id.clone(),
                    attempts: self.attempt,
                    last_error,
                });
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: JobSnapshot) -> Option<Result<JobOutcome, JobError>> {
        match snapshot.status {
            JobStatus::Completed => {
                info!(
                    "job {} completed after {} polls",
                    self.job_id, self.attempt
                );
                Some(Ok(JobOutcome {
                    job_id: self.job_id.clone(),
                    attempts: self.attempt,
                    elapsed: self.started_at.elapsed(),
                    started: self.started.clone(),
                    result: snapshot.result.unwrap_or(Value::Null),
                }))
            }
            JobStatus::Failed => {
                let message = snapshot.error.unwrap_or_else(|| "job failed".to_string());
                info!("job {} failed: {message}", self.job_id);
                Some(Err(JobError::Failed {
                    job_id: self.job_id.clone(),
                    message,
                }))
            }
            JobStatus::Waiting | JobStatus::Active => {
                if let Some(raw) = snapshot.progress {
                    let event = ProgressEvent {
                        job_id: self.job_id.clone(),
                        attempt: self.attempt,
                        percent: self.progress.observe(raw),
                        status: snapshot.status,
                    };
                    if let Some(cb) = self.on_progress.as_mut() {
                        cb(&event);
                    }
                }
                None
            }
        }
    }

    fn budget_spent(&self) -> bool {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return true;
            }
        }
        if let Some(max) = self.max_elapsed {
            if self.started_at.elapsed() + self.interval > max {
                return true;
            }
        }
        false
    }

    fn cancelled(&self) -> JobError {
        debug!(
            "poll session cancelled job={} after {} polls",
            self.job_id, self.attempt
        );
        JobError::Cancelled {
            job_id: self.job_id.clone(),
        }
    }
}

impl<T: JobTransport> Drop for PollSession<T> {
    fn drop(&mut self) {
        // Stops anything still tied to this session's token.
        self.cancel.cancel();
    }
}
