//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\riparr\config.toml
//! - macOS: ~/Library/Application Support/riparr/config.toml
//! - Linux: ~/.config/riparr/config.toml
//!
//! Environment variables override file values so container deployments
//! can be configured without a file (see [`Config::apply_overrides`]).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::StreamingServiceKind;

/// Default naming pattern for filed downloads.
pub const DEFAULT_PATH_PATTERN: &str = "{artist}/{artist} - {title}";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub jellyfin: JellyfinConfig,
    pub musicbrainz: MusicBrainzConfig,
    pub streaming: StreamingConfig,
    pub paths: PathsConfig,
    pub processing: ProcessingConfig,
}

/// Request store location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file (None = `riparr.db` in the working directory)
    pub path: Option<PathBuf>,
}

/// Media library (Jellyfin) connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JellyfinConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// MusicBrainz catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicBrainzConfig {
    pub base_url: String,
    /// Contact part of the User-Agent MusicBrainz requires
    pub contact: String,
    pub search_limit: u32,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            base_url: "https://musicbrainz.org/ws/2".to_string(),
            contact: "https://github.com/riparr/riparr".to_string(),
            search_limit: 10,
        }
    }
}

/// Streaming services and download engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Primary service first, then fallbacks in order
    pub service_order: Vec<StreamingServiceKind>,
    /// Download quality tier (0-4)
    pub quality: u8,
    /// Download engine executable
    pub rip_binary: String,
    /// Download engine config file (credentials live there)
    pub streamrip_config: Option<PathBuf>,
    pub search_limit: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            service_order: vec![StreamingServiceKind::Qobuz, StreamingServiceKind::Deezer],
            quality: 3,
            rip_binary: "rip".to_string(),
            streamrip_config: None,
            search_limit: 10,
        }
    }
}

/// Where downloads land
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Scratch area for in-flight downloads (kept on post-processing failure)
    pub temp_dir: PathBuf,
    /// Root of the organized music library
    pub output_dir: PathBuf,
    /// Naming pattern with `{artist}`, `{title}`, `{album}` placeholders
    pub path_pattern: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("riparr").join("downloads"),
            output_dir: PathBuf::from("music"),
            path_pattern: DEFAULT_PATH_PATTERN.to_string(),
        }
    }
}

/// Post-download processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Write canonical tags into downloaded files
    pub tag_files: bool,
    /// Seconds a claim on a running request stays valid without a heartbeat
    pub claim_lease_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            tag_files: true,
            claim_lease_secs: 300,
        }
    }
}

impl Config {
    /// Apply environment-style overrides.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; tests pass a map.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            self.database.path = Some(PathBuf::from(strip_sqlite_scheme(&url)));
        }
        if let Some(url) = get("JELLYFIN_URL") {
            self.jellyfin.url = Some(url);
        }
        if let Some(key) = get("JELLYFIN_API_KEY") {
            self.jellyfin.api_key = Some(key);
        }
        if let Some(path) = get("STREAMRIP_CONFIG_PATH") {
            self.streaming.streamrip_config = Some(PathBuf::from(path));
        }

        let primary = get("PRIMARY_STREAMING_SERVICE").and_then(|s| parse_service(&s));
        let fallback = get("FALLBACK_STREAMING_SERVICE").and_then(|s| parse_service(&s));
        if primary.is_some() || fallback.is_some() {
            let mut order = Vec::new();
            if let Some(p) = primary.or_else(|| self.streaming.service_order.first().copied()) {
                order.push(p);
            }
            match fallback {
                Some(f) => order.push(f),
                None => order.extend(self.streaming.service_order.iter().skip(1).copied()),
            }
            let mut seen = Vec::new();
            order.retain(|kind| {
                let fresh = !seen.contains(kind);
                seen.push(*kind);
                fresh
            });
            self.streaming.service_order = order;
        }

        if let Some(q) = get("DOWNLOAD_QUALITY") {
            match q.trim().parse() {
                Ok(quality) => self.streaming.quality = quality,
                Err(_) => tracing::warn!("Ignoring invalid DOWNLOAD_QUALITY {:?}", q),
            }
        }
        if let Some(path) = get("TEMP_DOWNLOAD_PATH") {
            self.paths.temp_dir = PathBuf::from(path);
        }
        if let Some(path) = get("MUSIC_OUTPUT_PATH") {
            self.paths.output_dir = PathBuf::from(path);
        }
        if let Some(pattern) = get("MUSIC_PATH_PATTERN") {
            self.paths.path_pattern = pattern;
        }
        if let Some(contact) = get("MUSICBRAINZ_USER_AGENT") {
            self.musicbrainz.contact = contact;
        }
        if let Some(flag) = get("PICARD_ENABLED") {
            self.processing.tag_files = flag.trim().eq_ignore_ascii_case("true");
        }
    }

    /// Check the settings the fulfillment pipeline depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.streaming.service_order.is_empty() {
            return Err(ConfigError::Invalid(
                "streaming.service_order must name at least one service".to_string(),
            ));
        }
        if self.streaming.quality > 4 {
            return Err(ConfigError::Invalid(format!(
                "streaming.quality must be 0-4, got {}",
                self.streaming.quality
            )));
        }
        if self.processing.claim_lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "processing.claim_lease_secs must be positive".to_string(),
            ));
        }
        let pattern = &self.paths.path_pattern;
        if !["{artist}", "{title}", "{album}"]
            .iter()
            .any(|p| pattern.contains(p))
        {
            return Err(ConfigError::Invalid(format!(
                "paths.path_pattern {:?} has no placeholder",
                pattern
            )));
        }
        Ok(())
    }

    /// SQLite URL for the request store.
    pub fn database_url(&self) -> String {
        crate::db::db_url(self.database.path.as_deref())
    }
}

fn parse_service(value: &str) -> Option<StreamingServiceKind> {
    match value.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    }
}

/// Accept `sqlite:path`, `sqlite://path` and `sqlite:///path`.
fn strip_sqlite_scheme(url: &str) -> &str {
    let rest = url.strip_prefix("sqlite:").unwrap_or(url);
    // Three slashes is relative, a fourth one makes it absolute
    rest.strip_prefix("///")
        .or_else(|| rest.strip_prefix("//"))
        .unwrap_or(rest)
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("riparr"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk and the environment
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let mut config = match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!("Could not determine config directory, using defaults");
            Config::default()
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config
}

/// Load a config file, falling back to defaults
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Save configuration to a specific file
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Tests
// ============================================================================
