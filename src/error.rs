use std::path::PathBuf;

use reqwest::StatusCode;

/// Errors raised by a [crate::runtime::ContainerRuntime].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("image {0} not found")]
    ImageNotFound(String),

    #[error("no such container {0}")]
    NoSuchContainer(String),

    #[error("engine rejected {operation} with {status}: {message}")]
    Engine {
        operation: &'static str,
        status: u16,
        message: String,
    },
}

/// Errors raised by a [crate::vod::VodApi].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{context} returned {status}")]
    Status {
        context: &'static str,
        status: StatusCode,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Terminal failures of a single upload task.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("upload target for {0} carries no curl command")]
    MissingCommand(String),

    #[error("vod id for {title} not resolved after {attempts} attempts")]
    RetryExhausted {
        title: String,
        attempts: u32,
        output: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("schedule is not valid json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("schedule is empty")]
    Empty,

    #[error("video files are not all in the same directory")]
    MixedDirectories,

    #[error("video file {0} does not exist")]
    MissingFile(PathBuf),

    #[error("only past events provided")]
    OnlyPastEntries,
}
