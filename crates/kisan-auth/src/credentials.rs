//! File-backed credential store
//!
//! Keeps the session's access/refresh pair in a small JSON file:
//!
//! ```json
//! {"access_token": "...", "refresh_token": "..."}
//! ```
//!
//! Either field may be absent. All writes use atomic temp-file + rename to
//! prevent corruption on crash. A tokio Mutex serializes writes from the
//! refresh path and the session endpoints.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{TokenPair, TokenStore};

/// On-disk shape of the credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl From<TokenFile> for TokenPair {
    fn from(file: TokenFile) -> Self {
        TokenPair {
            access: file.access_token.filter(|t| !t.is_empty()).map(Secret::new),
            refresh: file.refresh_token.filter(|t| !t.is_empty()).map(Secret::new),
        }
    }
}

impl From<&TokenPair> for TokenFile {
    fn from(pair: &TokenPair) -> Self {
        TokenFile {
            access_token: pair.access.as_ref().map(|s| s.expose().clone()),
            refresh_token: pair.refresh.as_ref().map(|s| s.expose().clone()),
        }
    }
}

/// Credential pair persisted to a JSON file.
///
/// Reads clone the in-memory state under a brief lock; every mutation
/// rewrites the file before returning.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<TokenPair>,
}

impl FileTokenStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (signed-out start).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let file: TokenFile = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let pair = TokenPair::from(file);
            info!(
                path = %path.display(),
                has_access = pair.access.is_some(),
                has_refresh = pair.refresh.is_some(),
                "loaded session credentials"
            );
            pair
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let pair = TokenPair::default();
            write_atomic(&path, &pair).await?;
            pair
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl TokenStore for FileTokenStore {
    fn access(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.access.clone() })
    }

    fn refresh(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.refresh.clone() })
    }

    fn save(
        &self,
        access: Secret<String>,
        refresh: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.access = Some(access);
            state.refresh = Some(refresh);
            debug!("saved session credentials");
            write_atomic(&self.path, &state).await
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = TokenPair::default();
            debug!("cleared session credentials");
            write_atomic(&self.path, &state).await
        })
    }

    fn replace_access_if(
        &self,
        refresh: Secret<String>,
        access: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.replace_access_if(&refresh, access) {
                debug!("session changed during refresh, access credential not saved");
                return Ok(false);
            }
            write_atomic(&self.path, &state).await?;
            Ok(true)
        })
    }

    fn clear_if(
        &self,
        refresh: Option<Secret<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if !state.clear_if(refresh.as_ref()) {
                debug!("session changed, leaving stored credentials in place");
                return Ok(false);
            }
            write_atomic(&self.path, &state).await?;
            Ok(true)
        })
    }
}

/// Write the credential pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 on unix since the file holds tokens.
async fn write_atomic(path: &Path, pair: &TokenPair) -> Result<()> {
    let json = serde_json::to_string_pretty(&TokenFile::from(pair))
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return Err(Error::Io("credential path has no parent directory".into())),
    };

    let tmp_path = dir.join(format!(".kisan-session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
