//! Subcommand implementations.

pub mod migrate;
pub mod moderate;
pub mod plans;
pub mod seed;
