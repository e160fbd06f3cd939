//! SQL migration definitions for the levelgrid database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: roles, grid tables, prompt_versions, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Role snapshots (one per processed leveling guide)
CREATE TABLE IF NOT EXISTS roles (
    id          TEXT PRIMARY KEY,
    company_id  TEXT NOT NULL,
    name        TEXT NOT NULL,
    state       TEXT NOT NULL,
    source_hash TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

-- Lookups are always (company, name, state) or (company, state)
CREATE INDEX IF NOT EXISTS idx_roles_company_name_state
    ON roles(company_id, name, state);

-- Grid rows: seniority levels in document order
CREATE TABLE IF NOT EXISTS levels (
    id        TEXT PRIMARY KEY,
    role_id   TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    order_idx INTEGER NOT NULL,
    UNIQUE(role_id, order_idx)
);

CREATE INDEX IF NOT EXISTS idx_levels_role ON levels(role_id);

-- Grid columns: competencies in document order
CREATE TABLE IF NOT EXISTS competencies (
    id        TEXT PRIMARY KEY,
    role_id   TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    order_idx INTEGER NOT NULL,
    UNIQUE(role_id, order_idx)
);

CREATE INDEX IF NOT EXISTS idx_competencies_role ON competencies(role_id);

-- Requirement text per (level, competency) cell
CREATE TABLE IF NOT EXISTS definitions (
    id            TEXT PRIMARY KEY,
    role_id       TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    level_id      TEXT NOT NULL REFERENCES levels(id) ON DELETE CASCADE,
    competency_id TEXT NOT NULL REFERENCES competencies(id) ON DELETE CASCADE,
    requirement   TEXT NOT NULL,
    UNIQUE(role_id, level_id, competency_id)
);

CREATE INDEX IF NOT EXISTS idx_definitions_role ON definitions(role_id);

-- Generated behavioral examples (0-3 per cell per run)
CREATE TABLE IF NOT EXISTS examples (
    id            TEXT PRIMARY KEY,
    role_id       TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    level_id      TEXT NOT NULL REFERENCES levels(id) ON DELETE CASCADE,
    competency_id TEXT NOT NULL REFERENCES competencies(id) ON DELETE CASCADE,
    content       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_examples_cell
    ON examples(role_id, level_id, competency_id);

-- Lexical quality snapshot per cell per run, with prompt provenance
CREATE TABLE IF NOT EXISTS quality_metrics (
    id                   TEXT PRIMARY KEY,
    role_id              TEXT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    level_id             TEXT NOT NULL REFERENCES levels(id) ON DELETE CASCADE,
    competency_id        TEXT NOT NULL REFERENCES competencies(id) ON DELETE CASCADE,
    definition_id        TEXT NOT NULL REFERENCES definitions(id) ON DELETE CASCADE,
    prompt_id            TEXT,
    prompt_key           TEXT NOT NULL,
    prompt_version       INTEGER NOT NULL,
    prompt_model         TEXT NOT NULL,
    prompt_temperature   REAL NOT NULL,
    examples_count       INTEGER NOT NULL,
    avg_length_chars     INTEGER NOT NULL,
    avg_length_words     INTEGER NOT NULL,
    action_verb_count    INTEGER NOT NULL,
    artifact_term_count  INTEGER NOT NULL,
    generic_phrase_count INTEGER NOT NULL,
    uniqueness_score     REAL NOT NULL,
    action_verb_density  REAL NOT NULL,
    artifact_density     REAL NOT NULL,
    generic_density      REAL NOT NULL,
    created_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_quality_role ON quality_metrics(role_id);
CREATE INDEX IF NOT EXISTS idx_quality_prompt
    ON quality_metrics(prompt_id, prompt_version);

-- Append-only prompt configurations, one active version per key
CREATE TABLE IF NOT EXISTS prompt_versions (
    id                    TEXT PRIMARY KEY,
    key                   TEXT NOT NULL,
    version               INTEGER NOT NULL,
    name                  TEXT NOT NULL,
    description           TEXT NOT NULL,
    system_message        TEXT NOT NULL,
    user_message_template TEXT NOT NULL,
    model                 TEXT NOT NULL,
    temperature           REAL NOT NULL,
    is_active             INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT NOT NULL,
    UNIQUE(key, version)
);

CREATE INDEX IF NOT EXISTS idx_prompt_versions_key_active
    ON prompt_versions(key, is_active);

-- Processing-run status rows (poll anchor for submitted guides)
CREATE TABLE IF NOT EXISTS runs (
    id             TEXT PRIMARY KEY,
    company_id     TEXT NOT NULL,
    role_name      TEXT NOT NULL,
    state          TEXT NOT NULL,
    message        TEXT NOT NULL,
    warning        TEXT,
    result_role_id TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_state ON runs(state);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
