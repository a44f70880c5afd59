// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::JobId;

#[derive(Error, Debug)]
pub enum JobwardenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Subscriber disconnected: outbound queue of {capacity} events overflowed")]
    SubscriberOverflow { capacity: usize },

    #[error("Job service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, JobwardenError>;
