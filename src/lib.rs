//! Snippet test runner library
//!
//! Scans a Python snippet for imports, provisions a Docker sandbox for it,
//! runs its unittest suite and normalizes the output into structured
//! results.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod feedback;
pub mod logging;
pub mod middleware;
pub mod normalizer;
pub mod pipeline;
pub mod runner;
pub mod sandbox;
pub mod scanner;
pub mod schemas;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use normalizer::{normalize, ResultSummary, TestOutcome};
pub use pipeline::{Pipeline, PipelineError, RunReport, SnippetSubmission};
pub use server::App;
