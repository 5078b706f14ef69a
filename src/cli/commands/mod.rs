//! CLI command definitions and dispatch.
//!
//! Each group of subcommands is implemented in its own submodule:
//! - `requests`: Request creation, listing and processing
//! - `library`: Library cache sync and search
//! - `search`: Metadata and streaming catalog search
//! - `settings`: Configuration inspection and saving

mod library;
mod requests;
mod search;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::db::{self, RequestStore};
use crate::fulfillment::{EngineSettings, FulfillmentEngine, LocalPostProcessor, TracingSink};
use crate::library::jellyfin::JellyfinClient;
use crate::library::{LibraryError, LibraryIndex, MediaLibrary};
use crate::metadata::MetadataResolver;
use crate::metadata::musicbrainz::MusicBrainzClient;
use crate::model::{ContentType, RequestStatus};
use crate::sources::{SourceLocator, StreamingService};
use crate::sources::streamrip::StreamripService;

pub use library::{cmd_search_library, cmd_sync_library, cmd_test_jellyfin};
pub use requests::{
    cmd_init_db, cmd_list, cmd_process, cmd_process_pending, cmd_recover, cmd_request, cmd_show,
};
pub use search::{cmd_search_metadata, cmd_search_streaming};
pub use settings::cmd_config;

/// riparr CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: OS config dir)
    #[arg(long, global = true, env = "RIPARR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and run migrations
    InitDb,
    /// Create a request
    Request {
        /// Title of the song, album or artist
        title: String,
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        album: Option<String>,
        /// song, album or artist
        #[arg(short, long, default_value = "song")]
        kind: ContentType,
        /// MusicBrainz id picked from search-metadata
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long, env = "USER", default_value = "operator")]
        owner: String,
        /// Process right away
        #[arg(long)]
        process: bool,
    },
    /// List requests
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        status: Option<RequestStatus>,
    },
    /// Show one request
    Show { id: i64 },
    /// Run the fulfillment pipeline for a request
    Process { id: i64 },
    /// Process every pending request
    ProcessPending,
    /// Fail requests left mid-flight by a crashed run
    Recover,
    /// Refresh the library cache from Jellyfin
    SyncLibrary,
    /// Check the Jellyfin connection
    TestJellyfin,
    /// Search MusicBrainz
    SearchMetadata {
        query: String,
        #[arg(long)]
        artist: Option<String>,
        #[arg(short, long, default_value = "song")]
        kind: ContentType,
    },
    /// Search every configured streaming service
    SearchStreaming {
        query: String,
        #[arg(short, long, default_value = "song")]
        kind: ContentType,
    },
    /// Search the cached library
    SearchLibrary {
        query: String,
        #[arg(short, long)]
        kind: Option<ContentType>,
    },
    /// Inspect or save configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write the effective configuration to the config file
    Save,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = load_config(cli);

    match &cli.command {
        Commands::InitDb => cmd_init_db(&rt, &config),
        Commands::Request {
            title,
            artist,
            album,
            kind,
            external_id,
            owner,
            process,
        } => cmd_request(
            &rt,
            &config,
            requests::RequestArgs {
                title,
                artist: artist.as_deref(),
                album: album.as_deref(),
                kind: *kind,
                external_id: external_id.as_deref(),
                owner,
                process: *process,
            },
        ),
        Commands::List { owner, status } => cmd_list(&rt, &config, owner.as_deref(), *status),
        Commands::Show { id } => cmd_show(&rt, &config, *id),
        Commands::Process { id } => cmd_process(&rt, &config, *id),
        Commands::ProcessPending => cmd_process_pending(&rt, &config),
        Commands::Recover => cmd_recover(&rt, &config),
        Commands::SyncLibrary => cmd_sync_library(&rt, &config),
        Commands::TestJellyfin => cmd_test_jellyfin(&rt, &config),
        Commands::SearchMetadata { query, artist, kind } => {
            cmd_search_metadata(&rt, &config, query, artist.as_deref(), *kind)
        }
        Commands::SearchStreaming { query, kind } => {
            cmd_search_streaming(&rt, &config, query, *kind)
        }
        Commands::SearchLibrary { query, kind } => cmd_search_library(&rt, &config, query, *kind),
        Commands::Config { action } => cmd_config(&config, cli.config.as_deref(), action),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Config file + environment, with the `--db` flag on top.
fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = config::load_from(path);
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => config::load(),
    };
    if let Some(db) = &cli.db {
        config.database.path = Some(db.clone());
    }
    config
}

pub(crate) async fn open_db(config: &Config) -> anyhow::Result<SqlitePool> {
    let url = config.database_url();
    db::init_db(&url)
        .await
        .with_context(|| format!("opening database {url}"))
}

/// Jellyfin as the library source, if configured.
pub(crate) fn library_source(config: &Config) -> anyhow::Result<Option<Arc<dyn MediaLibrary>>> {
    match JellyfinClient::from_config(&config.jellyfin) {
        Ok(client) => Ok(Some(Arc::new(client))),
        Err(LibraryError::NotConfigured) => {
            tracing::info!("Jellyfin not configured, library cache is read-only");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn metadata_resolver(config: &Config) -> anyhow::Result<MetadataResolver> {
    let client = MusicBrainzClient::new(&config.musicbrainz)?;
    Ok(MetadataResolver::new(Arc::new(client)))
}

pub(crate) fn source_locator(config: &Config) -> SourceLocator {
    let scratch = config.paths.temp_dir.join("search");
    SourceLocator::new(
        StreamripService::from_config(&config.streaming, &scratch)
            .into_iter()
            .map(|service| Arc::new(service) as Arc<dyn StreamingService>)
            .collect(),
    )
}

/// Wire the engine from config.
pub(crate) async fn build_engine(config: &Config) -> anyhow::Result<FulfillmentEngine> {
    config.validate()?;
    let pool = open_db(config).await?;
    let library = LibraryIndex::load(pool.clone(), library_source(config)?).await?;

    Ok(FulfillmentEngine::new(
        RequestStore::new(pool),
        Arc::new(library),
        metadata_resolver(config)?,
        source_locator(config),
        Arc::new(LocalPostProcessor),
        Arc::new(TracingSink),
        EngineSettings::from_config(config),
    ))
}
