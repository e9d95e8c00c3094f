//! Delivery errors.

/// Errors returned by [`NotifierClient::send`](crate::NotifierClient::send).
///
/// Only transport-class variants are retried. API rejections, cancellation
/// and deadline expiry end a send immediately.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The robot API answered with a nonzero `errcode`.
    #[error("robot API error [{code}]: {message}")]
    Api { code: i64, message: String },

    /// The endpoint answered with a non-2xx HTTP status.
    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Network-level failure (connect, TLS, timeout, body read).
    #[error("request failed: {0}")]
    Request(String),

    /// The 2xx response body was not the expected `{errcode, errmsg}` JSON.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("send cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every attempt failed with a retryable error.
    #[error("send failed after {retries} retries: {last}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        last: Box<DeliveryError>,
    },

    #[error("invalid webhook URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HttpStatus { .. } | Self::Request(_) | Self::Decode(_)
        )
    }

    /// The robot API error code and message, if this is an API rejection.
    pub fn api_error(&self) -> Option<(i64, &str)> {
        match self {
            Self::Api { code, message } => Some((*code, message.as_str())),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}
