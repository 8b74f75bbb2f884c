//! Error types for credential storage and the refresh exchange

/// Errors from credential and refresh operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("refresh request failed: {0}")]
    Http(String),

    #[error("refresh exchange failed: {0}")]
    TokenExchange(String),

    #[error("refresh credential rejected: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
