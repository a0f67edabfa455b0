//! # stemsplit common library
//!
//! Shared code for the stemsplit service crates:
//! - Bootstrap configuration (TOML) and config file resolution
//! - Common error type

pub mod config;
pub mod error;

pub use error::{Error, Result};
