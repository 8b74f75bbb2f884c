//! Refresh exchange
//!
//! Trades the stored refresh credential for a new access credential:
//!
//! `POST <auth base>/auth/refresh` with `{"refresh_token": "..."}`,
//! answered by `{"access_token": "..."}`.
//!
//! The refresh credential itself is not rotated by the backend; callers keep
//! the one they sent.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::{HttpRequest, Method, Transport};

use crate::constants::REFRESH_PATH;
use crate::error::{Error, Result};

/// Body of the refresh exchange.
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Successful refresh response.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Full refresh URL for an auth base such as `http://127.0.0.1:8000`.
pub fn refresh_url(auth_base: &str) -> String {
    format!("{}{}", auth_base.trim_end_matches('/'), REFRESH_PATH)
}

/// Exchange a refresh credential for a new access credential.
///
/// The call goes out without an Authorization header. Any non-2xx status,
/// transport failure, or body without a non-empty `access_token` is an error.
pub async fn refresh_access_token(
    transport: &dyn Transport,
    url: &str,
    refresh: &Secret<String>,
) -> Result<RefreshResponse> {
    let request = HttpRequest::new(Method::POST, url)
        .with_json(&RefreshRequest {
            refresh_token: refresh.expose(),
        })
        .map_err(|e| Error::Http(e.to_string()))?;

    let response = transport
        .send(request)
        .await
        .map_err(|e| Error::Http(e.to_string()))?;

    let status = response.status;
    if !status.is_success() {
        let body = response.text();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "refresh endpoint returned {status}: {body}"
        )));
    }

    let parsed: RefreshResponse = response
        .json()
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    if parsed.access_token.is_empty() {
        return Err(Error::TokenExchange(
            "refresh response carried an empty access_token".into(),
        ));
    }

    debug!(url, "refresh exchange succeeded");
    Ok(parsed)
}
