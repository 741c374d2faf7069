//! CLI command implementations.

pub mod serve_demo;
pub mod watch;
