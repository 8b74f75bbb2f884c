//! Credential store abstraction
//!
//! The access and refresh credentials are stored independently: a store may
//! hold an access credential with no refresh credential (in which case a 401
//! cannot be recovered) or be empty altogether.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use tokio::sync::Mutex;

use crate::error::Result;

/// Access/refresh pair as held in memory.
#[derive(Debug, Clone, Default)]
pub struct TokenPair {
    pub access: Option<Secret<String>>,
    pub refresh: Option<Secret<String>>,
}

impl TokenPair {
    /// Install `access` only if the pair still holds `refresh`.
    pub fn replace_access_if(&mut self, refresh: &Secret<String>, access: Secret<String>) -> bool {
        if self.refresh.as_ref() != Some(refresh) {
            return false;
        }
        self.access = Some(access);
        true
    }

    /// Empty the pair only if its refresh credential is still `expected`
    /// (`None`: still absent).
    pub fn clear_if(&mut self, expected: Option<&Secret<String>>) -> bool {
        if self.refresh.as_ref() != expected {
            return false;
        }
        *self = TokenPair::default();
        true
    }
}

/// Persistent home of the credential pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenStore>`).
pub trait TokenStore: Send + Sync {
    /// Current access credential, if any.
    fn access(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Current refresh credential, if any.
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>>;

    /// Replace both credentials.
    fn save(
        &self,
        access: Secret<String>,
        refresh: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove both credentials.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Replace the access credential if the session still holds `refresh`.
    ///
    /// Returns `false` without writing when the session was replaced or
    /// cleared since `refresh` was read.
    fn replace_access_if(
        &self,
        refresh: Secret<String>,
        access: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Remove both credentials if the refresh credential is still `refresh`.
    ///
    /// Returns `false` without writing when another session was stored.
    fn clear_if(
        &self,
        refresh: Option<Secret<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;
}

/// Non-persistent store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<TokenPair>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given credentials; either may be absent.
    pub fn with_tokens(access: Option<&str>, refresh: Option<&str>) -> Self {
        Self {
            state: Mutex::new(TokenPair {
                access: access.map(Secret::from),
                refresh: refresh.map(Secret::from),
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
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
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.lock().await = TokenPair::default();
            Ok(())
        })
    }

    fn replace_access_if(
        &self,
        refresh: Secret<String>,
        access: Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .state
                .lock()
                .await
                .replace_access_if(&refresh, access))
        })
    }

    fn clear_if(
        &self,
        refresh: Option<Secret<String>>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        Box::pin(async move { Ok(self.state.lock().await.clear_if(refresh.as_ref())) })
    }
}
