//! Shared utilities

pub mod error;

pub use error::{CoordinatorError, CoordinatorResult, ErrorResponse};
