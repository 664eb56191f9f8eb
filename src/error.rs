use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0} is not set")]
    MissingSecret(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sdk(#[from] hashhedge_sdk::Error),

    #[error("store error: {0}")]
    Store(#[from] hashhedge_store::StoreError),

    #[error("task failed: {0}")]
    Task(String),
}
