//! riparr - music request fulfillment.
//!
//! Takes requests for songs, albums and artists, checks the Jellyfin
//! library for them, and otherwise resolves canonical metadata from
//! MusicBrainz, locates a source on the configured streaming services,
//! downloads, tags and files it into the music library.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fulfillment;
pub mod library;
pub mod metadata;
pub mod model;
pub mod organizer;
pub mod scanner;
pub mod sources;
pub mod tagging;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("riparr=info".parse()?))
        .init();

    cli::run_command(&args)
}
