//! CLI command implementations.

pub mod config;
pub mod experiments;
pub mod measure;
pub mod optimize;
