//! Shared building blocks for the Fieldlink crates: configuration model,
//! error type, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
