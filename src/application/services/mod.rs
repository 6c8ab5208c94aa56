//! Application services — the lifecycle engine and its building blocks.

pub mod collect;
pub mod exec;
pub mod lifecycle;
pub mod orchestrator;
pub mod poll;
