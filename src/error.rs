//! Application-wide error types.
//!
//! Each module owns the error enum for its own operations; `AppError` is the
//! aggregate the binary reports from.

use thiserror::Error;

use crate::cli::CliError;
use crate::dates::DateError;
use crate::http::{RequestError, StoreError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("cli error: {0}")]
    Cli(#[from] CliError),

    #[error("date error: {0}")]
    Date(#[from] DateError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
