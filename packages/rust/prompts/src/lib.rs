//! Versioned prompt registry with built-in fallbacks.
//!
//! Prompt configurations are append-only: an update creates a new version
//! (max existing + 1) and the activation swap is atomic, so any historical
//! version can be restored without losing history. When a key has no stored
//! active version, [`PromptRegistry::resolve_or_default`] degrades to the
//! built-in configuration instead of failing; both the guide parser and the
//! example orchestrator share this one fallback path.

pub mod defaults;
pub mod render;

use std::sync::Arc;

use levelgrid_shared::{LevelGridError, PromptSpec, PromptVersionRecord, Result};
use levelgrid_storage::Store;
use tracing::{info, warn};

pub use defaults::{GENERATE_EXAMPLES_KEY, PARSE_GUIDE_KEY, default_prompts};
pub use render::render_template;

/// A prompt configuration ready for a generation call.
///
/// `id` is `None` and `version` is 0 when the configuration came from the
/// built-in fallback rather than a stored version; quality metrics record
/// both values as provenance.
#[derive(Debug, Clone)]
pub struct ResolvedPrompt {
    pub id: Option<String>,
    pub key: String,
    pub version: i64,
    pub system_message: String,
    pub user_message_template: String,
    pub model: String,
    pub temperature: f64,
}

impl From<PromptVersionRecord> for ResolvedPrompt {
    fn from(record: PromptVersionRecord) -> Self {
        Self {
            id: Some(record.id),
            key: record.key,
            version: record.version,
            system_message: record.system_message,
            user_message_template: record.user_message_template,
            model: record.model,
            temperature: record.temperature,
        }
    }
}

/// Partial field set for [`PromptRegistry::update`]; `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct PromptUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_message: Option<String>,
    pub user_message_template: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

/// Registry of versioned prompts backed by the store.
#[derive(Clone)]
pub struct PromptRegistry {
    store: Arc<Store>,
}

impl PromptRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The active stored version for a key. Errors with not-found when the
    /// key has no active version; pipeline callers should prefer
    /// [`Self::resolve_or_default`].
    pub async fn resolve_active(&self, key: &str) -> Result<PromptVersionRecord> {
        self.store
            .get_active_prompt(key)
            .await?
            .ok_or_else(|| LevelGridError::not_found(format!("prompt {key}")))
    }

    /// The active stored version for a key, or the built-in configuration
    /// when none is stored. Errors only for keys without a built-in default.
    pub async fn resolve_or_default(&self, key: &str) -> Result<ResolvedPrompt> {
        if let Some(record) = self.store.get_active_prompt(key).await? {
            return Ok(record.into());
        }
        let spec = defaults::default_for(key)
            .ok_or_else(|| LevelGridError::not_found(format!("prompt {key}")))?;
        warn!(key, "no active stored prompt, using built-in fallback");
        Ok(ResolvedPrompt {
            id: None,
            key: spec.key,
            version: 0,
            system_message: spec.system_message,
            user_message_template: spec.user_message_template,
            model: spec.model,
            temperature: spec.temperature,
        })
    }

    /// Append a new version for a key. With `activate`, the new version
    /// becomes the single active one for that key.
    pub async fn create_version(
        &self,
        spec: &PromptSpec,
        activate: bool,
    ) -> Result<PromptVersionRecord> {
        self.store.create_prompt_version(spec, activate).await
    }

    /// Update a key's configuration: fields left `None` carry over from the
    /// current active version (or the built-in default when none is stored),
    /// and the merged result is appended as a new active version.
    pub async fn update(&self, key: &str, changes: PromptUpdate) -> Result<PromptVersionRecord> {
        let mut spec = self.base_spec(key).await?;
        if let Some(name) = changes.name {
            spec.name = name;
        }
        if let Some(description) = changes.description {
            spec.description = description;
        }
        if let Some(system_message) = changes.system_message {
            spec.system_message = system_message;
        }
        if let Some(user_message_template) = changes.user_message_template {
            spec.user_message_template = user_message_template;
        }
        if let Some(model) = changes.model {
            spec.model = model;
        }
        if let Some(temperature) = changes.temperature {
            spec.temperature = temperature;
        }
        self.store.create_prompt_version(&spec, true).await
    }

    async fn base_spec(&self, key: &str) -> Result<PromptSpec> {
        if let Some(record) = self.store.get_active_prompt(key).await? {
            return Ok(PromptSpec {
                key: record.key,
                name: record.name,
                description: record.description,
                system_message: record.system_message,
                user_message_template: record.user_message_template,
                model: record.model,
                temperature: record.temperature,
            });
        }
        defaults::default_for(key)
            .ok_or_else(|| LevelGridError::not_found(format!("prompt {key}")))
    }

    /// Reactivate a historical version by id.
    pub async fn activate(&self, version_id: &str) -> Result<PromptVersionRecord> {
        self.store
            .activate_prompt_version(version_id)
            .await?
            .ok_or_else(|| LevelGridError::not_found(format!("prompt version {version_id}")))
    }

    /// Seed built-in prompts for keys that have no stored version yet.
    /// Idempotent across restarts; returns the number of versions created.
    pub async fn seed_defaults(&self) -> Result<usize> {
        let mut created = 0;
        for spec in defaults::default_prompts() {
            if self.store.list_prompt_versions(&spec.key).await?.is_empty() {
                let version = self.store.create_prompt_version(&spec, true).await?;
                info!(key = %version.key, "seeded default prompt");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Active version of every key.
    pub async fn list_active(&self) -> Result<Vec<PromptVersionRecord>> {
        self.store.list_active_prompts().await
    }

    /// Full version history for one key, newest first.
    pub async fn history(&self, key: &str) -> Result<Vec<PromptVersionRecord>> {
        self.store.list_prompt_versions(key).await
    }
}
