//! Reauthentication entry point
//!
//! Invoked exactly when the client clears the stored credentials: no refresh
//! credential was available for a 401, or the refresh exchange failed. In the
//! application this is "send the user to the login screen".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::warn;

/// Receives the signal that the user must sign in again.
pub trait ReauthHandler: Send + Sync {
    fn reauthentication_required(&self, reason: &str);
}

impl<F> ReauthHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn reauthentication_required(&self, reason: &str) {
        self(reason)
    }
}

/// Login-screen redirect for the gateway.
///
/// Records that a sign-in is pending so it can be surfaced on `/session`,
/// `/health`, and in 401 error bodies. Cleared when a new session is stored.
#[derive(Debug)]
pub struct LoginRedirect {
    login_path: String,
    required: AtomicBool,
    signals: AtomicU64,
}

impl LoginRedirect {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
            required: AtomicBool::new(false),
            signals: AtomicU64::new(0),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn is_required(&self) -> bool {
        self.required.load(Ordering::Relaxed)
    }

    /// Number of times reauthentication has been signalled.
    pub fn signal_count(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    /// A fresh session was stored; the redirect no longer applies.
    pub fn acknowledge(&self) {
        self.required.store(false, Ordering::Relaxed);
    }
}

impl ReauthHandler for LoginRedirect {
    fn reauthentication_required(&self, reason: &str) {
        self.required.store(true, Ordering::Relaxed);
        self.signals.fetch_add(1, Ordering::Relaxed);
        warn!(login = %self.login_path, reason, "reauthentication required");
    }
}
