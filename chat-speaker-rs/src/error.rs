//! Error types for chat-speaker-rs.
//!
//! None of these ever terminate the process: each is logged at the
//! component boundary that produced it and the pipeline moves on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("summarizer returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed summarizer response: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("failed to open audio output: {0}")]
    Open(String),

    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact {path} not rendered within {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("failed to claim artifact {path}: {source}")]
    Claim {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("chat connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("chat connection closed by server")]
    Closed,
}
