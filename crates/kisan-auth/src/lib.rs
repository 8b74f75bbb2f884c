//! Kisan+ session credentials
//!
//! Owns the access/refresh credential pair and the refresh exchange against
//! the backend. This crate has no knowledge of request replay or refresh
//! coalescing; that lives in `kisan-client`.
//!
//! Credential flow:
//! 1. The external phone-OTP login produces an access/refresh pair
//! 2. The pair is stored via `TokenStore::save()`
//! 3. Every outbound call reads `TokenStore::access()`
//! 4. On expiry the client calls `token::refresh_access_token()` once
//! 5. The new access credential is saved, the refresh credential unchanged
//! 6. On refresh failure the pair is removed with `TokenStore::clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod store;
pub mod token;

pub use constants::*;
pub use credentials::FileTokenStore;
pub use error::{Error, Result};
pub use store::{MemoryTokenStore, TokenPair, TokenStore};
pub use token::{RefreshRequest, RefreshResponse, refresh_access_token, refresh_url};
