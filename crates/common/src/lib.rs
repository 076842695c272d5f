//! Shared types for the API client workspace
//!
//! Holds the pieces both the library crates and the CLI need: a redacting
//! wrapper for sensitive values and the configuration error type.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
