use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("config: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Anything other than 200 or 429; the raw body is kept for the operator.
    #[error("unexpected response (status {status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
