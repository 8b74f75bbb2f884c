//! Authenticated HTTP client for the Kisan+ backend
//!
//! Wraps outbound calls with a bearer credential and recovers from expiry
//! without involving the caller. All 401s that arrive while a refresh is in
//! flight are coalesced onto that single exchange and replayed once it
//! resolves.
//!
//! Request lifecycle:
//! 1. `request()` attaches `Authorization: Bearer <access>` if one is stored
//! 2. Any status other than 401 is returned unmodified
//! 3. First 401 with no refresh in flight → this request leads the refresh
//! 4. 401s during the refresh queue as waiters, resolved in arrival order
//! 5. Success → new access persisted, waiters and leader replay once
//! 6. Failure → credentials cleared, reauthentication signalled, all fail
//! 7. A replay that gets 401 again fails with `RetryExhausted`

pub mod client;
pub mod error;
mod metrics;
pub mod reauth;
pub mod refresh;
pub mod request;

#[cfg(test)]
mod testing;

pub use client::{AuthenticatedHttpClient, ClientConfig};
pub use error::{Error, Result};
pub use reauth::{LoginRedirect, ReauthHandler};
pub use refresh::RefreshStatus;
pub use request::RequestSpec;
