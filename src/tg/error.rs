use std::time::Duration;

use thiserror::Error;

use super::types::Response;

/// Boxed error produced by a transport implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for Bot API operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the Bot API.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced an HTTP response (connection, DNS,
    /// timeout).
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    /// The server answered with a non-success status, or with an
    /// `ok: false` envelope.
    #[error("remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    /// The response body is not the envelope we expected.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The bot configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No chat id was given and no chat target has been set yet.
    #[error("no chat id given and no chat target set")]
    NoChatTarget,
}

impl Error {
    /// Whether the poll loop may retry after this error. A garbled body
    /// (e.g. an HTML page from a proxy) counts as transient; the retry
    /// budget still bounds a batch that never decodes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Remote { .. } | Error::Decode(_)
        )
    }

    /// The server-requested delay carried by a `429 Too Many Requests`
    /// style error body, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Remote { body, .. } => {
                let envelope: Response<serde_json::Value> = serde_json::from_str(body).ok()?;
                let secs = envelope.parameters?.retry_after?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        // The request URL carries the bot token.
        Error::Transport(Box::new(err.without_url()))
    }
}
