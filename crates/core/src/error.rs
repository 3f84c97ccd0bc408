//! Error type shared by the fallible parts of the core.
//!
//! The execution engine itself never fails: a step always returns a cycle
//! count. Errors come from loading firmware, validating a [`Config`],
//! building the serial bridge buffers, and reading or writing the
//! persistent settings record.
//!
//! [`Config`]: crate::config::Config

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("firmware image is {size} bytes but the ROM holds {max}")]
    ImageTooLarge { size: usize, max: usize },
    #[error("hex line {line}: {reason}")]
    Hex { line: usize, reason: String },
    #[error("{name} capacity {value} must be a power of two and at least 2")]
    Capacity { name: &'static str, value: usize },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("settings record: {0}")]
    Settings(String),
    #[error("settings encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub(crate) fn hex(line: usize, reason: impl Into<String>) -> Self {
        CoreError::Hex { line, reason: reason.into() }
    }
}
