//! Shared types, error model, and configuration for levelgrid.
//!
//! This crate is the foundation depended on by all other levelgrid crates.
//! It provides:
//! - [`LevelGridError`], the unified error type with sanitized user messages
//! - Domain types ([`RoleRecord`], [`ParsedGuide`], [`RoleId`], [`RunId`], ...)
//! - Configuration ([`AppConfig`], [`GenerationOptions`], config loading)
//! - [`CancellationToken`] for aborting runs between generation batches

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cancel::CancellationToken;
pub use config::{
    AppConfig, GenerationConfig, GenerationOptions, OpenAiConfig, StorageConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    resolve_db_path,
};
pub use error::{LevelGridError, Result};
pub use types::{
    CompetencyRecord, DefinitionRecord, ExampleRecord, LevelRecord, ParsedCell, ParsedGuide,
    PromptSpec, PromptVersionRecord, QualityRecord, RoleId, RoleRecord, RoleState, RunId,
    RunRecord, RunState,
};
