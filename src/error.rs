use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the orchestrator backend.
///
/// Every variant renders as a single line suitable for showing to the user.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never reached the backend, or the connection dropped mid-response.
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response. `message` is the backend's `{message}` when it sent one.
    #[error("{message}")]
    Backend { status: StatusCode, message: String },
    /// 2xx response whose body did not match the expected shape.
    #[error("{context}: malformed response: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// Rejected locally before any request was made.
    #[error("{0}")]
    Validation(String),
}

/// Failures of the start/cancel commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("run {run_id} is {status} and can no longer be cancelled")]
    NotCancellable { run_id: String, status: String },
    #[error("run {0} has not been loaded yet")]
    UnknownRun(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}
