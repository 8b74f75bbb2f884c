//! Shared types for the Kisan+ backend client workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
