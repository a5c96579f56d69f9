use thiserror::Error;

/// Failure talking to the illustration API.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// Failure invoking a OneBot action.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("action rejected (retcode {retcode}): {message}")]
    Rejected { retcode: i64, message: String },
}
