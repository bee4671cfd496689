use crate::{
    chat::{ChatTurn, ChatTurnSubmitter},
    client::AsyncJobClient,
    config::Config,
    error::JobError,
    ocr::{CaptureSubmitter, ImageUpload},
    poll::{CancelHandle, ProgressEvent, ProgressFn},
    progress::{self, JobKind},
    report::JobSummary,
    transport::{HttpTransport, JobTransport},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tutor-jobs")]
#[command(about = "Submit OCR captures and tutor chat turns, then follow the jobs to completion")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./tutor-jobs.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print effective settings and check that the backend answers.
    Doctor {},
    /// Upload an image for OCR and wait for the result.
    Ocr {
        #[arg(long)]
        input: PathBuf,
        /// MIME type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
    },
    /// Ask the tutor agent a question and wait for the reply.
    Chat {
        #[arg(long)]
        message: String,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        problem: Option<String>,
        #[arg(long)]
        session_id: Option<String>,
    },
    /// Fetch a job's status once.
    Status {
        #[arg(long, value_enum)]
        kind: JobKind,
        #[arg(long)]
        job_id: String,
    },
    /// Follow an already-submitted job until it finishes.
    Watch {
        #[arg(long, value_enum)]
        kind: JobKind,
        #[arg(long)]
        job_id: String,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref())?;
    let cfg = if cfg_path.exists() {
        Config::load(&cfg_path)?
    } else {
        Config::default()
    };
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    if !cfg_path.exists() {
        warn!("config not found at {}; using defaults", cfg_path.display());
    }

    let client = AsyncJobClient::new(HttpTransport::new(&cfg)?);

    match args.cmd {
        Command::Doctor {} => doctor(&cfg, &cfg_path, client.transport()).await,
        Command::Ocr { input, mime } => ocr(&cfg, client, &input, mime.as_deref()).await,
        Command::Chat {
            message,
            grade,
            topic,
            problem,
            session_id,
        } => {
            let turn = ChatTurn {
                message,
                grade_level: grade,
                topic,
                problem,
                session_id,
            };
            chat(&cfg, client, turn).await
        }
        Command::Status { kind, job_id } => status(&cfg, client.transport(), kind, &job_id).await,
        Command::Watch { kind, job_id } => watch(&cfg, client, kind, &job_id).await,
    }
}

fn resolve_config_path(user: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = user {
        if !p.exists() {
            return Err(anyhow!("config file does not exist: {}", p.display()));
        }
        return Ok(p.to_path_buf());
    }
    let default = PathBuf::from("tutor-jobs.toml");
    if default.exists() {
        Ok(default)
    } else {
        Ok(PathBuf::from("tutor-jobs.example.toml"))
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries results; logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("tutor-jobs.log"))
}

async fn doctor(cfg: &Config, cfg_path: &Path, transport: &HttpTransport) -> Result<()> {
    let health = match transport.health(&cfg.api.health_path).await {
        Ok(code) => serde_json::json!({ "path": cfg.api.health_path, "status": code }),
        Err(err) => serde_json::json!({ "path": cfg.api.health_path, "error": format!("{err:#}") }),
    };
    print_json(
        cfg,
        &serde_json::json!({
            "config": cfg_path,
            "config_found": cfg_path.exists(),
            "base_url": transport.base_url(),
            "token_env": cfg.api.token_env,
            "token_present": cfg.api_token().is_some(),
            "ocr": cfg.ocr,
            "chat": cfg.chat,
            "progress": cfg.progress,
            "health": health,
        }),
    )
}

async fn ocr(
    cfg: &Config,
    client: AsyncJobClient<HttpTransport>,
    input: &Path,
    mime: Option<&str>,
) -> Result<()> {
    let upload = ImageUpload::from_path(input, mime, cfg.ocr.max_file_bytes)?;
    let submitter = CaptureSubmitter::new(client, cfg);
    let signal = cancel_on_ctrl_c();

    let result = submitter
        .capture(upload, Some(progress_printer(JobKind::Ocr)), Some(signal))
        .await;
    let Some(capture) = settle(result)? else {
        return Ok(());
    };

    print_json(cfg, &capture.result)?;
    if cfg.output.print_summary {
        let summary = JobSummary::completed(
            JobKind::Ocr,
            &capture.job_id,
            capture.attempts,
            capture.elapsed,
            &capture.started,
        );
        print_json(cfg, &summary)?;
    }
    Ok(())
}

async fn chat(cfg: &Config, client: AsyncJobClient<HttpTransport>, turn: ChatTurn) -> Result<()> {
    let submitter = ChatTurnSubmitter::new(client, cfg);
    let signal = cancel_on_ctrl_c();

    let result = submitter
        .ask(turn, Some(progress_printer(JobKind::Chat)), Some(signal))
        .await;
    let Some(exchange) = settle(result)? else {
        return Ok(());
    };

    print_json(cfg, &exchange.reply)?;
    if cfg.output.print_summary {
        let summary = JobSummary::completed(
            JobKind::Chat,
            &exchange.job_id,
            exchange.attempts,
            exchange.elapsed,
            &exchange.started,
        );
        print_json(cfg, &summary)?;
    }
    Ok(())
}

async fn status(cfg: &Config, transport: &HttpTransport, kind: JobKind, job_id: &str) -> Result<()> {
    let path = match kind {
        JobKind::Ocr => &cfg.ocr.status_path,
        JobKind::Chat => &cfg.chat.status_path,
    };
    let snapshot = transport
        .fetch_status(path, job_id)
        .await
        .map_err(|e| anyhow!("status fetch failed for {} job {job_id}: {e}", kind.as_str()))?;
    print_json(cfg, &snapshot)
}

async fn watch(
    cfg: &Config,
    client: AsyncJobClient<HttpTransport>,
    kind: JobKind,
    job_id: &str,
) -> Result<()> {
    let signal = cancel_on_ctrl_c();
    let on_progress = Some(progress_printer(kind));
    let summary = match kind {
        JobKind::Ocr => {
            let submitter = CaptureSubmitter::new(client, cfg);
            let Some(capture) = settle(submitter.watch(job_id, on_progress, Some(signal)).await)?
            else {
                return Ok(());
            };
            print_json(cfg, &capture.result)?;
            JobSummary::completed(
                kind,
                &capture.job_id,
                capture.attempts,
                capture.elapsed,
                &capture.started,
            )
        }
        JobKind::Chat => {
            let submitter = ChatTurnSubmitter::new(client, cfg);
            let Some(exchange) = settle(submitter.watch(job_id, on_progress, Some(signal)).await)?
            else {
                return Ok(());
            };
            print_json(cfg, &exchange.reply)?;
            JobSummary::completed(
                kind,
                &exchange.job_id,
                exchange.attempts,
                exchange.elapsed,
                &exchange.started,
            )
        }
    };
    if cfg.output.print_summary {
        print_json(cfg, &summary)?;
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancelHandle {
    let handle = CancelHandle::new();
    let h = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; cancelling");
            h.cancel();
        }
    });
    handle
}

fn progress_printer(kind: JobKind) -> ProgressFn {
    Box::new(move |event: &ProgressEvent| eprintln!("{}", progress::render(kind, event)))
}

/// Cancelled jobs end quietly; other failures show their user-facing text.
fn settle<T>(result: std::result::Result<T, JobError>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(err) if err.is_cancelled() => {
            info!("{err}");
            Ok(None)
        }
        Err(err) => {
            if let Some(msg) = err.user_message() {
                eprintln!("{msg}");
            }
            Err(err.into())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(cfg: &Config, value: &T) -> Result<()> {
    let out = if cfg.output.pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}
