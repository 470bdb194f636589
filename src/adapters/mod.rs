//! Adapters for the domain ports.

pub mod oracle;
pub mod remote;
pub mod sqlite;
