pub mod chat;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod ocr;
pub mod poll;
pub mod progress;
pub mod report;
pub mod transport;
pub mod util;

pub use client::AsyncJobClient;
pub use error::{JobError, TransientPollError, ValidationError};
pub use poll::{CancelHandle, JobOutcome, PollOptions, PollSession, ProgressEvent};
