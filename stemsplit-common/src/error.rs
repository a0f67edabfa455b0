//! Common error types for stemsplit

use thiserror::Error;

/// Common result type for stemsplit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the stemsplit crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
