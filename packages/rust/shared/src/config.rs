//! Application configuration for levelgrid.
//!
//! User config lives at `~/.levelgrid/levelgrid.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LevelGridError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "levelgrid.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".levelgrid";

/// Default database file name under the config directory.
const DB_FILE_NAME: &str = "levelgrid.db";

// ---------------------------------------------------------------------------
// Config structs (matching levelgrid.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local database settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Example-generation concurrency settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// OpenAI-compatible generation service settings.
    #[serde(default)]
    pub openai: OpenAiConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path. Defaults to `~/.levelgrid/levelgrid.db` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Cells per batch; batches run strictly one after another.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum concurrent generation calls within a batch.
    #[serde(default = "default_max_workers")]
    pub max_workers: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
        }
    }
}

fn default_batch_size() -> u32 {
    20
}
fn default_max_workers() -> u32 {
    20
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Generation options (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime generation concurrency options - merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Cells per batch.
    pub batch_size: u32,
    /// Maximum concurrent calls within a batch.
    pub max_workers: u32,
}

impl From<&AppConfig> for GenerationOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.generation.batch_size.max(1),
            max_workers: config.generation.max_workers.max(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.levelgrid/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LevelGridError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.levelgrid/levelgrid.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the database file path from config, defaulting to
/// `~/.levelgrid/levelgrid.db`.
pub fn resolve_db_path(config: &AppConfig) -> Result<PathBuf> {
    match &config.storage.db_path {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config_dir()?.join(DB_FILE_NAME)),
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LevelGridError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LevelGridError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LevelGridError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LevelGridError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LevelGridError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenAI API key from the configured env var.
pub fn resolve_api_key(openai: &OpenAiConfig) -> Result<String> {
    let var_name = &openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(LevelGridError::config(format!(
            "OpenAI API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://platform.openai.com/api-keys"
        ))),
    }
}
