//! Human-readable phase names for raw progress percentages.

use crate::poll::ProgressEvent;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Ocr,
    Chat,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Ocr => "ocr",
            JobKind::Chat => "chat",
        }
    }
}

pub fn phase_label(kind: JobKind, percent: u8) -> &'static str {
    match (kind, percent) {
        (_, 0..=10) => "starting",
        (JobKind::Ocr, 11..=39) => "reading image",
        (JobKind::Chat, 11..=39) => "thinking",
        (_, 40..=50) => "connecting",
        (JobKind::Ocr, 51..=89) => "extracting",
        (JobKind::Chat, 51..=89) => "writing reply",
        _ => "finalizing",
    }
}

pub fn render(kind: JobKind, event: &ProgressEvent) -> String {
    format!(
        "[{}] {:>3}% {} ({})",
        kind.as_str(),
        event.percent,
        phase_label(kind, event.percent),
        event.status.as_str()
    )
}
