use thiserror::Error;

pub type KustomuxResult<T> = Result<T, KustomuxError>;

#[derive(Error, Debug)]
pub enum KustomuxError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
