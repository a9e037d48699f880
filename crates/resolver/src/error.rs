use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolverError>;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("model name currently not supported: {0}")]
    UnsupportedModel(String),

    #[error("model must point to an actual file, not a server: {0}")]
    ServerAddressNotAllowed(String),

    #[error("expected a server address, not a model path: {0}")]
    FilePathNotAllowed(String),

    #[error("`{command}` failed in {} ({status})", cwd.display())]
    ToolFailed {
        command: String,
        cwd: PathBuf,
        status: String,
    },

    #[error("Model hub error: {0}")]
    Hub(String),

    #[error("Invalid port binding in {}: {value:?}", path.display())]
    InvalidPortBinding { path: PathBuf, value: String },
}
