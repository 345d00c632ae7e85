//! Error types for the HTTP boundary

mod types;

pub use types::ApiError;
