//! Fleetbench - fan-out benchmark deployments across remote instances
//!
//! The library surface exists so integration tests can drive the lifecycle
//! engine with in-process port implementations instead of live SSH sessions.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod application;
pub mod cli;
pub mod commands;
pub mod domain;
pub mod infra;
pub mod output;
