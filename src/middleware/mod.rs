//! HTTP middleware: request logging and metrics collection.

pub mod logging;

pub use logging::RequestLogging;
