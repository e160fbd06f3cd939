//! Core domain types for levelgrid role grids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for role identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub Uuid);

impl RoleId {
    /// Generate a new time-sortable role identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RoleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A UUID v7 wrapper for processing-run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Lifecycle states
// ---------------------------------------------------------------------------

/// Lifecycle state of a role snapshot.
///
/// `Building` covers the window between skeleton creation and the final
/// commit; queries for the current guide only match `Active`. Retirement
/// flips the role row alone, so child rows stay readable under the old id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleState {
    Building,
    Active,
    Retired,
}

impl RoleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "building" => Some(Self::Building),
            "active" => Some(Self::Active),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

/// Externally visible state of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Processing,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal runs never change state again and are eligible for eviction.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

// ---------------------------------------------------------------------------
// Parsed grid (structuring-call output)
// ---------------------------------------------------------------------------

/// One cell of the parsed grid: a (level, competency) intersection and the
/// requirement text extracted verbatim from the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCell {
    pub level_name: String,
    pub competency_name: String,
    pub requirement: String,
}

/// Structured grid returned by the guide parser.
///
/// Ordering of `levels` and `competencies` is exactly as extracted
/// (junior to senior, original column order) and becomes the persisted
/// order index. Missing keys deserialize as empty sequences; the caller
/// validates minimums.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedGuide {
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub competencies: Vec<String>,
    #[serde(default)]
    pub cells: Vec<ParsedCell>,
}

// ---------------------------------------------------------------------------
// Stored records
// ---------------------------------------------------------------------------

/// One role snapshot, the root of a level/competency grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Unique role identifier (UUID v7).
    pub id: String,
    /// Owning company.
    pub company_id: String,
    /// Role name (e.g. "Software Engineer").
    pub name: String,
    /// Lifecycle state; at most one `active` per (company, name).
    pub state: RoleState,
    /// SHA-256 hash of the source document text.
    pub source_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One seniority level row of a role's grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelRecord {
    pub id: String,
    pub role_id: String,
    pub name: String,
    /// Zero-based document order, unique within the role.
    pub order_idx: u32,
}

/// One competency column of a role's grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetencyRecord {
    pub id: String,
    pub role_id: String,
    pub name: String,
    /// Zero-based document order, unique within the role.
    pub order_idx: u32,
}

/// Requirement text at one (level, competency) cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub id: String,
    pub role_id: String,
    pub level_id: String,
    pub competency_id: String,
    pub requirement: String,
}

/// One generated behavioral example for a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleRecord {
    pub id: String,
    pub role_id: String,
    pub level_id: String,
    pub competency_id: String,
    pub content: String,
}

/// Lexical quality snapshot for one cell's example set, written once per
/// run and immutable after that. Carries the prompt provenance the examples
/// were generated with; `prompt_id` is absent when the built-in fallback
/// prompt was used (recorded as version 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRecord {
    pub id: String,
    pub role_id: String,
    pub level_id: String,
    pub competency_id: String,
    pub definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    pub prompt_key: String,
    pub prompt_version: i64,
    pub prompt_model: String,
    pub prompt_temperature: f64,
    pub examples_count: i64,
    pub avg_length_chars: i64,
    pub avg_length_words: i64,
    pub action_verb_count: i64,
    pub artifact_term_count: i64,
    pub generic_phrase_count: i64,
    pub uniqueness_score: f64,
    pub action_verb_density: f64,
    pub artifact_density: f64,
    pub generic_density: f64,
    pub created_at: DateTime<Utc>,
}

/// One immutable configuration for a named prompt purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersionRecord {
    pub id: String,
    /// Purpose key, e.g. "parse_guide" or "generate_examples".
    pub key: String,
    /// Monotonic per key, starting at 1.
    pub version: i64,
    pub name: String,
    pub description: String,
    pub system_message: String,
    pub user_message_template: String,
    pub model: String,
    pub temperature: f64,
    /// Exactly one version per key is active at any time.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Field set for creating a new prompt version. Storage assigns the id,
/// the next version number, and the timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub key: String,
    pub name: String,
    pub description: String,
    pub system_message: String,
    pub user_message_template: String,
    pub model: String,
    pub temperature: f64,
}

/// Status row for one processing run, the poll anchor for callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier (UUID v7).
    pub id: String,
    pub company_id: String,
    pub role_name: String,
    pub state: RunState,
    /// Human-readable progress or failure message.
    pub message: String,
    /// Non-fatal quality signal (e.g. low parse coverage).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// Set when the run completes: the finished role's id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_role_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
