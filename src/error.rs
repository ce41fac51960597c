use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rotator error: {0}")]
    Rotator(String),

    #[error("route error: {0}")]
    Route(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
