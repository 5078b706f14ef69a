//! Command-line interface for riparr.
//!
//! This module provides the operator surface: creating and processing
//! requests, syncing the library cache and probing the external services.

mod commands;

pub use commands::{Cli, Commands, run_command};
