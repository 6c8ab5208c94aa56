//! Application layer: port traits and the services that drive them.
//!
//! Imports only from `crate::domain`; all I/O is routed through injected
//! port implementations.

pub mod ports;
pub mod services;
