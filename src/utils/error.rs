use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PoolError>;
