use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub ocr: Ocr,
    #[serde(default)]
    pub chat: Chat,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Bearer token read from the environment variable named by `api.token_env`.
    pub fn api_token(&self) -> Option<String> {
        if self.api.token_env.is_empty() {
            return None;
        }
        std::env::var(&self.api.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub base_url: String,
    pub token_env: String,
    pub request_timeout_seconds: u64,
    pub health_path: String,
    pub user_agent: String,
}
impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".into(),
            token_env: "TUTOR_API_TOKEN".into(),
            request_timeout_seconds: 30,
            health_path: "/health".into(),
            user_agent: format!("tutor-jobs/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ocr {
    pub submit_path: String,
    pub status_path: String,
    pub form_field: String,
    pub interval_ms: u64,
    /// 0 means no attempt cap; the job is expected to terminate on its own.
    pub max_attempts: u32,
    /// 0 means no wall-clock budget.
    pub max_elapsed_seconds: u64,
    pub max_file_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}
impl Default for Ocr {
    fn default() -> Self {
        Self {
            submit_path: "/ocr/upload".into(),
            status_path: "/ocr/job".into(),
            form_field: "image".into(),
            interval_ms: 1500,
            max_attempts: 0,
            max_elapsed_seconds: 0,
            max_file_bytes: 10 * 1024 * 1024,
            allowed_mime_types: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/heic".into(),
                "image/heif".into(),
                "image/webp".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub submit_path: String,
    pub status_path: String,
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub max_elapsed_seconds: u64,
    pub grade_level: String,
}
impl Default for Chat {
    fn default() -> Self {
        Self {
            submit_path: "/agent/chat".into(),
            status_path: "/agent/chat".into(),
            interval_ms: 500,
            max_attempts: 60,
            max_elapsed_seconds: 0,
            grade_level: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub clamp_regressions: bool,
    pub honor_interval_hint: bool,
}
impl Default for Progress {
    fn default() -> Self {
        Self {
            clamp_regressions: true,
            honor_interval_hint: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub print_summary: bool,
    pub pretty: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            print_summary: true,
            pretty: true,
        }
    }
}

pub(crate) fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Maps the "0 means unbounded" config convention onto an `Option`.
pub(crate) fn nonzero_attempts(n: u32) -> Option<u32> {
    (n > 0).then_some(n)
}

pub(crate) fn nonzero_seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
