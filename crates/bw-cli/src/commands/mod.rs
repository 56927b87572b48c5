//! CLI subcommand implementations.

pub mod import;
pub mod phases;
pub mod quality;
pub mod reconcile;
pub mod status;
pub mod summarize;
pub mod usage;
