//! libSQL storage layer for role grids, prompt versions, and run status.
//!
//! The [`Store`] struct wraps a local libSQL database holding the role
//! snapshots (levels, competencies, definitions, examples, quality metrics),
//! the append-only prompt version history, and the processing-run rows that
//! callers poll.
//!
//! **Write rules:**
//! - All writes go through one connection and are serialized by an internal
//!   lock, so the multi-statement phases (skeleton creation, final commit,
//!   prompt activation) are real transactions that never interleave.
//! - Reads skip the lock and go straight to the connection.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use levelgrid_shared::{
    CompetencyRecord, DefinitionRecord, ExampleRecord, LevelGridError, LevelRecord, PromptSpec,
    PromptVersionRecord, QualityRecord, Result, RoleRecord, RoleState, RunRecord, RunState,
};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Store {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LevelGridError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let store = Self {
            db,
            conn,
            write_lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run all pending migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    "Applying migration {} - {}",
                    migration.version, migration.description
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LevelGridError::Storage(format!(
                            "Migration {} failed: {}",
                            migration.version, e
                        ))
                    })?;
            }
        }

        Ok(())
    }

    /// Current schema version (0 if the migrations table doesn't exist yet).
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;
        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Transaction plumbing
    // -----------------------------------------------------------------------

    async fn begin(&self) -> Result<()> {
        self.conn
            .execute("BEGIN IMMEDIATE", params![])
            .await
            .map_err(|e| LevelGridError::Storage(format!("begin failed: {e}")))?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.conn
            .execute("COMMIT", params![])
            .await
            .map_err(|e| LevelGridError::Storage(format!("commit failed: {e}")))?;
        Ok(())
    }

    /// Best effort; callers report the error that triggered the rollback.
    async fn rollback(&self) {
        let _ = self.conn.execute("ROLLBACK", params![]).await;
    }

    // -----------------------------------------------------------------------
    // Role graph operations
    // -----------------------------------------------------------------------

    /// Create a role skeleton in one transaction: retire any currently
    /// active role with the same (company, name), then insert the role row
    /// plus its levels, competencies, and definitions.
    ///
    /// The role row is inserted with whatever state the record carries
    /// (`building` during a normal run). Returns the number of roles retired.
    pub async fn create_role_graph(
        &self,
        role: &RoleRecord,
        levels: &[LevelRecord],
        competencies: &[CompetencyRecord],
        definitions: &[DefinitionRecord],
    ) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        let retired = match self
            .insert_role_graph(role, levels, competencies, definitions)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.rollback().await;
                return Err(e);
            }
        };
        if let Err(e) = self.commit().await {
            self.rollback().await;
            return Err(e);
        }
        Ok(retired)
    }

    async fn insert_role_graph(
        &self,
        role: &RoleRecord,
        levels: &[LevelRecord],
        competencies: &[CompetencyRecord],
        definitions: &[DefinitionRecord],
    ) -> Result<u64> {
        let retired = self
            .conn
            .execute(
                "UPDATE roles SET state = 'retired', updated_at = ?1
                 WHERE company_id = ?2 AND name = ?3 AND state = 'active'",
                params![
                    Utc::now().to_rfc3339(),
                    role.company_id.as_str(),
                    role.name.as_str()
                ],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        self.conn
            .execute(
                "INSERT INTO roles (id, company_id, name, state, source_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    role.id.as_str(),
                    role.company_id.as_str(),
                    role.name.as_str(),
                    role.state.as_str(),
                    role.source_hash.as_str(),
                    role.created_at.to_rfc3339(),
                    role.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        for level in levels {
            self.conn
                .execute(
                    "INSERT INTO levels (id, role_id, name, order_idx) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        level.id.as_str(),
                        level.role_id.as_str(),
                        level.name.as_str(),
                        i64::from(level.order_idx)
                    ],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        for competency in competencies {
            self.conn
                .execute(
                    "INSERT INTO competencies (id, role_id, name, order_idx) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        competency.id.as_str(),
                        competency.role_id.as_str(),
                        competency.name.as_str(),
                        i64::from(competency.order_idx)
                    ],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        for definition in definitions {
            self.conn
                .execute(
                    "INSERT INTO definitions (id, role_id, level_id, competency_id, requirement)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        definition.id.as_str(),
                        definition.role_id.as_str(),
                        definition.level_id.as_str(),
                        definition.competency_id.as_str(),
                        definition.requirement.as_str()
                    ],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        Ok(retired)
    }

    /// Finalize a run in one transaction: insert all generated examples and
    /// quality metrics, then flip the role from `building` to `active`.
    ///
    /// Fails without side effects if the role is no longer in `building`
    /// state (e.g. it was retired by a concurrent resubmission).
    pub async fn commit_role_graph(
        &self,
        role_id: &str,
        examples: &[ExampleRecord],
        metrics: &[QualityRecord],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        if let Err(e) = self.insert_run_results(role_id, examples, metrics).await {
            self.rollback().await;
            return Err(e);
        }
        if let Err(e) = self.commit().await {
            self.rollback().await;
            return Err(e);
        }
        Ok(())
    }

    async fn insert_run_results(
        &self,
        role_id: &str,
        examples: &[ExampleRecord],
        metrics: &[QualityRecord],
    ) -> Result<()> {
        for example in examples {
            self.conn
                .execute(
                    "INSERT INTO examples (id, role_id, level_id, competency_id, content)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        example.id.as_str(),
                        example.role_id.as_str(),
                        example.level_id.as_str(),
                        example.competency_id.as_str(),
                        example.content.as_str()
                    ],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        for metric in metrics {
            self.conn
                .execute(
                    "INSERT INTO quality_metrics (
                         id, role_id, level_id, competency_id, definition_id,
                         prompt_id, prompt_key, prompt_version, prompt_model, prompt_temperature,
                         examples_count, avg_length_chars, avg_length_words, action_verb_count,
                         artifact_term_count, generic_phrase_count, uniqueness_score,
                         action_verb_density, artifact_density, generic_density, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                             ?16, ?17, ?18, ?19, ?20, ?21)",
                    params![
                        metric.id.as_str(),
                        metric.role_id.as_str(),
                        metric.level_id.as_str(),
                        metric.competency_id.as_str(),
                        metric.definition_id.as_str(),
                        metric.prompt_id.as_deref(),
                        metric.prompt_key.as_str(),
                        metric.prompt_version,
                        metric.prompt_model.as_str(),
                        metric.prompt_temperature,
                        metric.examples_count,
                        metric.avg_length_chars,
                        metric.avg_length_words,
                        metric.action_verb_count,
                        metric.artifact_term_count,
                        metric.generic_phrase_count,
                        metric.uniqueness_score,
                        metric.action_verb_density,
                        metric.artifact_density,
                        metric.generic_density,
                        metric.created_at.to_rfc3339()
                    ],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        let activated = self
            .conn
            .execute(
                "UPDATE roles SET state = 'active', updated_at = ?1
                 WHERE id = ?2 AND state = 'building'",
                params![Utc::now().to_rfc3339(), role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        if activated == 0 {
            return Err(LevelGridError::storage(format!(
                "role {role_id} is not in building state"
            )));
        }

        Ok(())
    }

    /// Retire a role regardless of its current state. Used to clean up a
    /// half-built role after a failed or cancelled run.
    pub async fn retire_role(&self, role_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "UPDATE roles SET state = 'retired', updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a role by id, in any state.
    pub async fn get_role(&self, role_id: &str) -> Result<Option<RoleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, name, state, source_hash, created_at, updated_at
                 FROM roles WHERE id = ?1",
                params![role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_role(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LevelGridError::Storage(e.to_string())),
        }
    }

    /// Find the single active role for a (company, name) pair, if any.
    pub async fn find_active_role(
        &self,
        company_id: &str,
        name: &str,
    ) -> Result<Option<RoleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, name, state, source_hash, created_at, updated_at
                 FROM roles
                 WHERE company_id = ?1 AND name = ?2 AND state = 'active'
                 LIMIT 1",
                params![company_id, name],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_role(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LevelGridError::Storage(e.to_string())),
        }
    }

    /// List all active roles for a company, ordered by name.
    pub async fn list_active_roles(&self, company_id: &str) -> Result<Vec<RoleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, name, state, source_hash, created_at, updated_at
                 FROM roles
                 WHERE company_id = ?1 AND state = 'active'
                 ORDER BY name",
                params![company_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_role(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Grid reads
    // -----------------------------------------------------------------------

    /// Levels of a role in document order (junior to senior).
    pub async fn list_levels(&self, role_id: &str) -> Result<Vec<LevelRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, role_id, name, order_idx FROM levels
                 WHERE role_id = ?1 ORDER BY order_idx",
                params![role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_level(&row)?);
        }
        Ok(results)
    }

    /// Competencies of a role in document order.
    pub async fn list_competencies(&self, role_id: &str) -> Result<Vec<CompetencyRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, role_id, name, order_idx FROM competencies
                 WHERE role_id = ?1 ORDER BY order_idx",
                params![role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_competency(&row)?);
        }
        Ok(results)
    }

    /// All definitions of a role.
    pub async fn list_definitions(&self, role_id: &str) -> Result<Vec<DefinitionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, role_id, level_id, competency_id, requirement
                 FROM definitions WHERE role_id = ?1",
                params![role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_definition(&row)?);
        }
        Ok(results)
    }

    /// All generated examples of a role.
    pub async fn list_examples(&self, role_id: &str) -> Result<Vec<ExampleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, role_id, level_id, competency_id, content
                 FROM examples WHERE role_id = ?1",
                params![role_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_example(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Quality metrics
    // -----------------------------------------------------------------------

    /// Quality metrics for a role, optionally narrowed by prompt provenance.
    /// Fallback-prompt rows carry version 0 and a NULL prompt id.
    pub async fn list_quality_metrics(
        &self,
        role_id: &str,
        prompt_id: Option<&str>,
        prompt_version: Option<i64>,
    ) -> Result<Vec<QualityRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, role_id, level_id, competency_id, definition_id,
                        prompt_id, prompt_key, prompt_version, prompt_model, prompt_temperature,
                        examples_count, avg_length_chars, avg_length_words, action_verb_count,
                        artifact_term_count, generic_phrase_count, uniqueness_score,
                        action_verb_density, artifact_density, generic_density, created_at
                 FROM quality_metrics
                 WHERE role_id = ?1
                   AND (?2 IS NULL OR prompt_id = ?2)
                   AND (?3 IS NULL OR prompt_version = ?3)
                 ORDER BY created_at",
                params![role_id, prompt_id, prompt_version],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_quality(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Prompt versions
    // -----------------------------------------------------------------------

    /// Append a new version for a prompt key in one transaction. The version
    /// number is assigned as max(existing) + 1, starting at 1. When
    /// `activate` is set, the previous active version of the key is
    /// deactivated in the same transaction.
    pub async fn create_prompt_version(
        &self,
        spec: &PromptSpec,
        activate: bool,
    ) -> Result<PromptVersionRecord> {
        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        let record = match self.insert_prompt_version(spec, activate).await {
            Ok(record) => record,
            Err(e) => {
                self.rollback().await;
                return Err(e);
            }
        };
        if let Err(e) = self.commit().await {
            self.rollback().await;
            return Err(e);
        }
        Ok(record)
    }

    async fn insert_prompt_version(
        &self,
        spec: &PromptSpec,
        activate: bool,
    ) -> Result<PromptVersionRecord> {
        let mut rows = self
            .conn
            .query(
                "SELECT COALESCE(MAX(version), 0) FROM prompt_versions WHERE key = ?1",
                params![spec.key.as_str()],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        let current = match rows.next().await {
            Ok(Some(row)) => row.get::<i64>(0).unwrap_or(0),
            _ => 0,
        };

        let record = PromptVersionRecord {
            id: Uuid::now_v7().to_string(),
            key: spec.key.clone(),
            version: current + 1,
            name: spec.name.clone(),
            description: spec.description.clone(),
            system_message: spec.system_message.clone(),
            user_message_template: spec.user_message_template.clone(),
            model: spec.model.clone(),
            temperature: spec.temperature,
            is_active: activate,
            created_at: Utc::now(),
        };

        if activate {
            self.conn
                .execute(
                    "UPDATE prompt_versions SET is_active = 0 WHERE key = ?1",
                    params![spec.key.as_str()],
                )
                .await
                .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        }

        self.conn
            .execute(
                "INSERT INTO prompt_versions (
                     id, key, version, name, description, system_message,
                     user_message_template, model, temperature, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id.as_str(),
                    record.key.as_str(),
                    record.version,
                    record.name.as_str(),
                    record.description.as_str(),
                    record.system_message.as_str(),
                    record.user_message_template.as_str(),
                    record.model.as_str(),
                    record.temperature,
                    i64::from(record.is_active),
                    record.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        Ok(record)
    }

    /// Make the given version the active one for its key, deactivating the
    /// previous active version in the same transaction. Returns the
    /// refreshed record, or `None` if the id does not exist.
    pub async fn activate_prompt_version(
        &self,
        version_id: &str,
    ) -> Result<Option<PromptVersionRecord>> {
        let _guard = self.write_lock.lock().await;
        self.begin().await?;
        let activated = match self.swap_active_prompt(version_id).await {
            Ok(activated) => activated,
            Err(e) => {
                self.rollback().await;
                return Err(e);
            }
        };
        if let Err(e) = self.commit().await {
            self.rollback().await;
            return Err(e);
        }
        Ok(activated)
    }

    async fn swap_active_prompt(&self, version_id: &str) -> Result<Option<PromptVersionRecord>> {
        let target = match self.get_prompt_version(version_id).await? {
            Some(target) => target,
            None => return Ok(None),
        };

        self.conn
            .execute(
                "UPDATE prompt_versions SET is_active = 0 WHERE key = ?1",
                params![target.key.as_str()],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "UPDATE prompt_versions SET is_active = 1 WHERE id = ?1",
                params![version_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        self.get_prompt_version(version_id).await
    }

    /// The active version for a key, if any.
    pub async fn get_active_prompt(&self, key: &str) -> Result<Option<PromptVersionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key, version, name, description, system_message,
                        user_message_template, model, temperature, is_active, created_at
                 FROM prompt_versions
                 WHERE key = ?1 AND is_active = 1
                 LIMIT 1",
                params![key],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_prompt_version(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LevelGridError::Storage(e.to_string())),
        }
    }

    /// Get a prompt version by id.
    pub async fn get_prompt_version(
        &self,
        version_id: &str,
    ) -> Result<Option<PromptVersionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key, version, name, description, system_message,
                        user_message_template, model, temperature, is_active, created_at
                 FROM prompt_versions
                 WHERE id = ?1",
                params![version_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_prompt_version(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LevelGridError::Storage(e.to_string())),
        }
    }

    /// The active version of every key, ordered by key.
    pub async fn list_active_prompts(&self) -> Result<Vec<PromptVersionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key, version, name, description, system_message,
                        user_message_template, model, temperature, is_active, created_at
                 FROM prompt_versions
                 WHERE is_active = 1
                 ORDER BY key",
                params![],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_prompt_version(&row)?);
        }
        Ok(results)
    }

    /// Full version history for a key, newest first.
    pub async fn list_prompt_versions(&self, key: &str) -> Result<Vec<PromptVersionRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, key, version, name, description, system_message,
                        user_message_template, model, temperature, is_active, created_at
                 FROM prompt_versions
                 WHERE key = ?1
                 ORDER BY version DESC",
                params![key],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_prompt_version(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Insert a new run row (the poll anchor for a submitted guide).
    pub async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "INSERT INTO runs (id, company_id, role_name, state, message, warning,
                                   result_role_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.id.as_str(),
                    run.company_id.as_str(),
                    run.role_name.as_str(),
                    run.state.as_str(),
                    run.message.as_str(),
                    run.warning.as_deref(),
                    run.result_role_id.as_deref(),
                    run.created_at.to_rfc3339(),
                    run.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a run by id.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, role_name, state, message, warning,
                        result_role_id, created_at, updated_at
                 FROM runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(LevelGridError::Storage(e.to_string())),
        }
    }

    /// Update a run's state and message. A `result_role_id` of `None`
    /// leaves any previously stored value in place.
    pub async fn update_run(
        &self,
        run_id: &str,
        state: RunState,
        message: &str,
        result_role_id: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE runs SET state = ?1, message = ?2,
                        result_role_id = COALESCE(?3, result_role_id), updated_at = ?4
                 WHERE id = ?5",
                params![
                    state.as_str(),
                    message,
                    result_role_id,
                    Utc::now().to_rfc3339(),
                    run_id
                ],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        if updated == 0 {
            return Err(LevelGridError::not_found(format!("run {run_id}")));
        }
        Ok(())
    }

    /// Attach a non-fatal warning to a run.
    pub async fn set_run_warning(&self, run_id: &str, warning: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let updated = self
            .conn
            .execute(
                "UPDATE runs SET warning = ?1, updated_at = ?2 WHERE id = ?3",
                params![warning, Utc::now().to_rfc3339(), run_id],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        if updated == 0 {
            return Err(LevelGridError::not_found(format!("run {run_id}")));
        }
        Ok(())
    }

    /// Delete terminal runs not updated since the cutoff. Processing runs
    /// are never evicted. Returns the number of rows removed.
    pub async fn evict_runs(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .conn
            .execute(
                "DELETE FROM runs WHERE state != 'processing' AND updated_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| LevelGridError::Storage(e.to_string()))?;
        debug!(removed, "evicted terminal runs");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn timestamp_at(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| LevelGridError::Storage(e.to_string()))?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LevelGridError::Storage(format!("invalid date: {e}")))
}

fn row_to_role(row: &libsql::Row) -> Result<RoleRecord> {
    let state: String = row
        .get(3)
        .map_err(|e| LevelGridError::Storage(e.to_string()))?;
    Ok(RoleRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        company_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        name: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        state: RoleState::parse(&state)
            .ok_or_else(|| LevelGridError::Storage(format!("unknown role state: {state}")))?,
        source_hash: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        created_at: timestamp_at(row, 5)?,
        updated_at: timestamp_at(row, 6)?,
    })
}

fn row_to_level(row: &libsql::Row) -> Result<LevelRecord> {
    Ok(LevelRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        name: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        order_idx: row
            .get::<u32>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
    })
}

fn row_to_competency(row: &libsql::Row) -> Result<CompetencyRecord> {
    Ok(CompetencyRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        name: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        order_idx: row
            .get::<u32>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
    })
}

fn row_to_definition(row: &libsql::Row) -> Result<DefinitionRecord> {
    Ok(DefinitionRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        level_id: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        competency_id: row
            .get::<String>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        requirement: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
    })
}

fn row_to_example(row: &libsql::Row) -> Result<ExampleRecord> {
    Ok(ExampleRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        level_id: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        competency_id: row
            .get::<String>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        content: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
    })
}

fn row_to_quality(row: &libsql::Row) -> Result<QualityRecord> {
    Ok(QualityRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        level_id: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        competency_id: row
            .get::<String>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        definition_id: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        prompt_id: row.get::<String>(5).ok(),
        prompt_key: row
            .get::<String>(6)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        prompt_version: row
            .get::<i64>(7)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        prompt_model: row
            .get::<String>(8)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        prompt_temperature: row
            .get::<f64>(9)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        examples_count: row
            .get::<i64>(10)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        avg_length_chars: row
            .get::<i64>(11)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        avg_length_words: row
            .get::<i64>(12)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        action_verb_count: row
            .get::<i64>(13)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        artifact_term_count: row
            .get::<i64>(14)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        generic_phrase_count: row
            .get::<i64>(15)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        uniqueness_score: row
            .get::<f64>(16)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        action_verb_density: row
            .get::<f64>(17)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        artifact_density: row
            .get::<f64>(18)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        generic_density: row
            .get::<f64>(19)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        created_at: timestamp_at(row, 20)?,
    })
}

fn row_to_prompt_version(row: &libsql::Row) -> Result<PromptVersionRecord> {
    Ok(PromptVersionRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        key: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        version: row
            .get::<i64>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        name: row
            .get::<String>(3)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        description: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        system_message: row
            .get::<String>(5)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        user_message_template: row
            .get::<String>(6)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        model: row
            .get::<String>(7)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        temperature: row
            .get::<f64>(8)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        is_active: row
            .get::<i64>(9)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?
            != 0,
        created_at: timestamp_at(row, 10)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let state: String = row
        .get(3)
        .map_err(|e| LevelGridError::Storage(e.to_string()))?;
    Ok(RunRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        company_id: row
            .get::<String>(1)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        role_name: row
            .get::<String>(2)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        state: RunState::parse(&state)
            .ok_or_else(|| LevelGridError::Storage(format!("unknown run state: {state}")))?,
        message: row
            .get::<String>(4)
            .map_err(|e| LevelGridError::Storage(e.to_string()))?,
        warning: row.get::<String>(5).ok(),
        result_role_id: row.get::<String>(6).ok(),
        created_at: timestamp_at(row, 7)?,
        updated_at: timestamp_at(row, 8)?,
    })
}
