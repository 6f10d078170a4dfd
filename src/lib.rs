//! Keeps a remote full-text search index in sync with upstream twins, models,
//! insights and rules, and queries it.
//!
//! The interesting parts live in [`search`]; [`config`] and [`error`] carry
//! the ambient configuration and top-level error type used by the binary.

pub mod config;
pub mod error;
pub mod search;

pub use error::{AppError, Result};
