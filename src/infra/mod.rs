//! Infrastructure adapters fulfilling the application ports.

pub mod config;
pub mod fetch;
pub mod provision;
pub mod ssh;
