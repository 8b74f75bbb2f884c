//! Error taxonomy for authenticated calls
//!
//! Non-401 HTTP statuses are never errors here: they come back as
//! `Ok(HttpResponse)` and the caller renders them.

use std::time::Duration;

use transport::TransportError;

/// Errors from `AuthenticatedHttpClient::request`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No refresh credential, or the refresh exchange failed. Credentials
    /// have been cleared and reauthentication signalled.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    /// The replay after a refresh was rejected with 401 again.
    #[error("{method} {url} rejected with 401 after credential refresh")]
    RetryExhausted { method: String, url: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The task driving the refresh exchange was dropped before it resolved.
    #[error("credential refresh was abandoned before completing")]
    RefreshInterrupted,

    #[error("gave up after {0:?} waiting for credential refresh")]
    RefreshWaitTimeout(Duration),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Short label for metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::AuthenticationRequired(_) => "reauthentication_required",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::Transport(e) if e.is_timeout() => "gateway_timeout",
            Error::Transport(_) => "upstream_error",
            Error::RefreshInterrupted => "refresh_interrupted",
            Error::RefreshWaitTimeout(_) => "refresh_wait_timeout",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
