// src/error.rs
//! Error taxonomy for the relay pipeline.
//!
//! Only `ConfigError` is fatal, and only before the poller starts. Everything
//! else is caught at channel granularity and logged with channel/post ids.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Upstream feed failures. A post is never marked seen on these.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("vk request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("vk api error {code} in {method}: {message}")]
    Api {
        method: String,
        code: i64,
        message: String,
    },
    #[error("rate limited by vk api in {method}: {message}")]
    RateLimited { method: String, message: String },
    #[error("invalid channel {channel}: {reason}")]
    InvalidChannel { channel: String, reason: String },
    #[error("unexpected vk response from {method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Attachment shapes we cannot read. Logged and treated as "no media".
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("malformed {kind} attachment: {reason}")]
    MalformedAttachment { kind: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),
    #[error("webhook request failed: {0}")]
    Transport(String),
    #[error("webhook request timed out after {0:?}")]
    Timeout(Duration),
    #[error("webhook rejected payload with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl DeliveryError {
    /// Number of attempts made before this error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::Exhausted { attempts, .. } => *attempts,
            DeliveryError::InvalidUrl(_) => 0,
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("{var} points to non-existent path {}", path.display())]
    MissingFile { var: &'static str, path: PathBuf },
    #[error("reading config from {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported config format: {0}")]
    Parse(String),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
