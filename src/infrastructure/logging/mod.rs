//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber, with an optional
//! daily-rolling JSON file sink.

pub mod logger;

pub use logger::LoggerImpl;
