//! Domain layer for the vpn-tuner optimizer
//!
//! This module contains the core models and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
