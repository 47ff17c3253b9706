use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Truncated input at offset {offset}: expected {expected} bytes, got {actual}")]
    Truncated {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("Partition table contains no valid entries")]
    NoValidPartitions,

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Analysis cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CoreError>;
