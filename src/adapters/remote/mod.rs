//! Remote execution adapters.

pub mod scripted;
pub mod ssh;

pub use scripted::ScriptedExecutor;
pub use ssh::OpenSshExecutor;
