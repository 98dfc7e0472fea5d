use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptqError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Job payload decoding and validation failures. All of these are terminal
/// for the job that carries the payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("unknown job status '{0}'")]
    UnknownStatus(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid payload: {0}")]
    Invalid(String),
}
