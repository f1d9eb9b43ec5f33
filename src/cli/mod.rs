//! Command-line host for the monitoring engine.

mod commands;

pub use commands::{is_verbose, run};
