use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Tabular data error: {0}")]
    Tabular(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many attempts, retry in {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Commit rejected: {0}")]
    Commit(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
