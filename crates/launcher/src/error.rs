use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LaunchError>;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine stdout was not captured")]
    MissingStdout,

    #[error("port announcement without a usable port: {0:?}")]
    MalformedAnnouncement(String),

    #[error("engine did not announce its port within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("engine exited before announcing its port ({status})")]
    ExitedBeforeReady { status: String },

    #[error("Resolver error: {0}")]
    ResolverError(#[from] genie_resolver::ResolverError),

    #[error("Invalid toolkit pin: {0}")]
    InvalidPin(String),
}
