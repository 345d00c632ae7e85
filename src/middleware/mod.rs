//! Middleware module
//!
//! HTTP middleware for request logging and trace correlation.

pub mod logging;

pub use logging::{log_request, TraceId, REQUEST_ID_HEADER, TRACE_ID_HEADER};
