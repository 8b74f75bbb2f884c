//! Service-specific error types

use thiserror::Error;

/// Gateway start-up errors.
///
/// Per-request errors (backend timeout, backend failure, reauthentication)
/// are rendered by the proxy handler as HTTP responses; they never
/// propagate as Rust errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("failed to open session store: {0}")]
    SessionStore(#[from] kisan_auth::Error),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
