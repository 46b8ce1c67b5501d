use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage")]
    Storage,
    #[error("validation {0}")]
    Validation(String),
    #[error("transport {0}")]
    Transport(String),
    #[error("upload {0}")]
    Upload(String),
    #[error("download {0}")]
    Download(String),
    #[error("not found")]
    NotFound,
}
