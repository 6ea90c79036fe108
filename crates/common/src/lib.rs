//! Common utilities and types for the DI model copier
//!
//! This crate provides shared functionality used across the copier,
//! including the error taxonomy, resource and model data structures,
//! and retry/timing helpers.

pub mod error;
pub mod models;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
pub use types::*;
