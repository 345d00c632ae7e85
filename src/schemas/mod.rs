//! Schema module
//!
//! Wire types for external HTTP APIs.

pub mod gemini;
