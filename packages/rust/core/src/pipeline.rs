//! End-to-end guide processing: validate → parse → build → generate →
//! score → commit.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use levelgrid_genai::GenerationClient;
use levelgrid_metrics::QualityMetricsCalculator;
use levelgrid_prompts::{GENERATE_EXAMPLES_KEY, PromptRegistry};
use levelgrid_shared::{
    CancellationToken, CompetencyRecord, DefinitionRecord, ExampleRecord, GenerationOptions,
    LevelRecord, ParsedGuide, QualityRecord, Result, RoleId, RoleRecord, RoleState, RunState,
};
use levelgrid_storage::Store;

use crate::generator::{self, CellKey, CellTask, RunContext};
use crate::parser;
use crate::validate;

/// One guide submission: the inputs a processing run needs.
#[derive(Debug, Clone)]
pub struct SubmitGuide {
    pub company_id: String,
    pub role_name: String,
    pub company_url: String,
    pub raw_text: String,
}

/// A definition cell with its persisted row ids, carried from the build
/// phase into scoring.
struct PlannedCell {
    task: CellTask,
    level_id: String,
    competency_id: String,
    definition_id: String,
}

/// Run one guide through the full pipeline, updating run-row progress along
/// the way. Returns the new role's id; the caller records the terminal run
/// state.
///
/// The role skeleton is committed (state `building`) before generation
/// starts; any failure after that point retires it so no half-built grid
/// is ever visible to active-role queries.
#[instrument(skip_all, fields(run_id = %run_id, role_name = %request.role_name))]
pub async fn process_guide(
    store: &Store,
    registry: &PromptRegistry,
    client: &GenerationClient,
    options: &GenerationOptions,
    cancel: &CancellationToken,
    run_id: &str,
    request: &SubmitGuide,
) -> Result<String> {
    // --- Phase 1: Parse ---
    store
        .update_run(run_id, RunState::Processing, "Parsing leveling guide...", None)
        .await?;

    validate::validate_source_text(&request.raw_text)?;
    let guide = parser::parse_guide(registry, client, &request.raw_text).await?;
    let warning = validate::validate_parsed_guide(&guide)?;
    if let Some(warning) = &warning {
        warn!(run_id, warning = %warning, "parse coverage below half the expected cells");
        store.set_run_warning(run_id, warning).await?;
    }

    // --- Phase 2: Build the role skeleton ---
    store
        .update_run(run_id, RunState::Processing, "Building role grid...", None)
        .await?;

    let (role, levels, competencies, definitions, planned) = build_role_graph(request, &guide);
    let retired = store
        .create_role_graph(&role, &levels, &competencies, &definitions)
        .await?;
    if retired > 0 {
        info!(role_id = %role.id, retired, "retired previous active role");
    }

    // --- Phases 3 and 4: Generate, score, commit ---
    let result: Result<()> = async {
        store
            .update_run(run_id, RunState::Processing, "Generating examples...", None)
            .await?;

        let prompt = registry.resolve_or_default(GENERATE_EXAMPLES_KEY).await?;
        let ctx = RunContext {
            company_url: request.company_url.clone(),
            role_name: request.role_name.clone(),
        };
        let tasks: Vec<CellTask> = planned.iter().map(|p| p.task.clone()).collect();
        let outcomes =
            generator::generate_examples(client, &prompt, &ctx, &tasks, options, cancel).await?;

        store
            .update_run(run_id, RunState::Processing, "Scoring and saving results...", None)
            .await?;

        let calculator = QualityMetricsCalculator::default();
        let mut examples: Vec<ExampleRecord> = Vec::new();
        let mut metrics: Vec<QualityRecord> = Vec::new();
        let scored_at = Utc::now();

        for cell in &planned {
            let outcome = outcomes.get(&cell.task.key).cloned().unwrap_or_default();
            for content in &outcome.examples {
                examples.push(ExampleRecord {
                    id: Uuid::now_v7().to_string(),
                    role_id: role.id.clone(),
                    level_id: cell.level_id.clone(),
                    competency_id: cell.competency_id.clone(),
                    content: content.clone(),
                });
            }

            let m = calculator.compute(&outcome.examples);
            metrics.push(QualityRecord {
                id: Uuid::now_v7().to_string(),
                role_id: role.id.clone(),
                level_id: cell.level_id.clone(),
                competency_id: cell.competency_id.clone(),
                definition_id: cell.definition_id.clone(),
                prompt_id: prompt.id.clone(),
                prompt_key: prompt.key.clone(),
                prompt_version: prompt.version,
                prompt_model: prompt.model.clone(),
                prompt_temperature: prompt.temperature,
                examples_count: i64::from(m.examples_count),
                avg_length_chars: i64::from(m.avg_length_chars),
                avg_length_words: i64::from(m.avg_length_words),
                action_verb_count: i64::from(m.action_verb_count),
                artifact_term_count: i64::from(m.artifact_term_count),
                generic_phrase_count: i64::from(m.generic_phrase_count),
                uniqueness_score: m.uniqueness_score,
                action_verb_density: m.action_verb_density,
                artifact_density: m.artifact_density,
                generic_density: m.generic_density,
                created_at: scored_at,
            });
        }

        info!(
            role_id = %role.id,
            cells = planned.len(),
            examples = examples.len(),
            "committing role graph"
        );
        store.commit_role_graph(&role.id, &examples, &metrics).await
    }
    .await;

    match result {
        Ok(()) => Ok(role.id),
        Err(e) => {
            if let Err(retire_err) = store.retire_role(&role.id).await {
                warn!(role_id = %role.id, error = %retire_err, "failed to retire half-built role");
            }
            Err(e)
        }
    }
}

/// Materialize the parsed grid into record sets for the skeleton
/// transaction. Cells naming unknown levels or competencies are dropped;
/// duplicate (level, competency) cells keep the first requirement.
fn build_role_graph(
    request: &SubmitGuide,
    guide: &ParsedGuide,
) -> (
    RoleRecord,
    Vec<LevelRecord>,
    Vec<CompetencyRecord>,
    Vec<DefinitionRecord>,
    Vec<PlannedCell>,
) {
    let now = Utc::now();
    let role_id = RoleId::new().to_string();
    let role = RoleRecord {
        id: role_id.clone(),
        company_id: request.company_id.clone(),
        name: request.role_name.clone(),
        state: RoleState::Building,
        source_hash: source_hash(&request.raw_text),
        created_at: now,
        updated_at: now,
    };

    let levels: Vec<LevelRecord> = guide
        .levels
        .iter()
        .enumerate()
        .map(|(idx, name)| LevelRecord {
            id: Uuid::now_v7().to_string(),
            role_id: role_id.clone(),
            name: name.clone(),
            order_idx: idx as u32,
        })
        .collect();

    let competencies: Vec<CompetencyRecord> = guide
        .competencies
        .iter()
        .enumerate()
        .map(|(idx, name)| CompetencyRecord {
            id: Uuid::now_v7().to_string(),
            role_id: role_id.clone(),
            name: name.clone(),
            order_idx: idx as u32,
        })
        .collect();

    let level_ids: HashMap<&str, &str> = levels
        .iter()
        .map(|l| (l.name.as_str(), l.id.as_str()))
        .collect();
    let competency_ids: HashMap<&str, &str> = competencies
        .iter()
        .map(|c| (c.name.as_str(), c.id.as_str()))
        .collect();

    let mut definitions: Vec<DefinitionRecord> = Vec::new();
    let mut planned: Vec<PlannedCell> = Vec::new();
    let mut seen: HashSet<CellKey> = HashSet::new();

    for cell in &guide.cells {
        let level_id = match level_ids.get(cell.level_name.as_str()) {
            Some(id) => *id,
            None => {
                warn!(level = %cell.level_name, "cell references an unknown level, skipping");
                continue;
            }
        };
        let competency_id = match competency_ids.get(cell.competency_name.as_str()) {
            Some(id) => *id,
            None => {
                warn!(
                    competency = %cell.competency_name,
                    "cell references an unknown competency, skipping"
                );
                continue;
            }
        };

        let key = CellKey {
            level_name: cell.level_name.clone(),
            competency_name: cell.competency_name.clone(),
        };
        if !seen.insert(key.clone()) {
            warn!(cell = %key, "duplicate cell, keeping the first requirement");
            continue;
        }

        let definition_id = Uuid::now_v7().to_string();
        definitions.push(DefinitionRecord {
            id: definition_id.clone(),
            role_id: role_id.clone(),
            level_id: level_id.to_string(),
            competency_id: competency_id.to_string(),
            requirement: cell.requirement.clone(),
        });
        planned.push(PlannedCell {
            task: CellTask {
                key,
                requirement: cell.requirement.clone(),
            },
            level_id: level_id.to_string(),
            competency_id: competency_id.to_string(),
            definition_id,
        });
    }

    (role, levels, competencies, definitions, planned)
}

fn source_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use levelgrid_shared::{LevelGridError, RunId, RunRecord};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GUIDE_TEXT: &str = "Level | Technical Skills | Communication\n\
        L1 | Writes well-scoped code with guidance. | Asks questions early and often.\n\
        L2 | Owns medium features end to end. | Writes clear design docs for review.";

    struct TestEnv {
        server: MockServer,
        store: Arc<Store>,
        registry: PromptRegistry,
        client: GenerationClient,
    }

    async fn test_env() -> TestEnv {
        let server = MockServer::start().await;
        let db_path =
            std::env::temp_dir().join(format!("levelgrid_pipeline_test_{}.db", Uuid::now_v7()));
        let store = Arc::new(Store::open(&db_path).await.expect("open store"));
        let registry = PromptRegistry::new(store.clone());
        let client =
            GenerationClient::new("sk-test", server.uri(), Duration::from_secs(5)).expect("client");
        TestEnv {
            server,
            store,
            registry,
            client,
        }
    }

    fn request() -> SubmitGuide {
        SubmitGuide {
            company_id: "company-1".into(),
            role_name: "Software Engineer".into(),
            company_url: "https://example.com".into(),
            raw_text: GUIDE_TEXT.into(),
        }
    }

    fn options() -> GenerationOptions {
        GenerationOptions {
            batch_size: 20,
            max_workers: 20,
        }
    }

    async fn insert_run(store: &Store, request: &SubmitGuide) -> String {
        let run_id = RunId::new().to_string();
        let now = Utc::now();
        store
            .insert_run(&RunRecord {
                id: run_id.clone(),
                company_id: request.company_id.clone(),
                role_name: request.role_name.clone(),
                state: RunState::Processing,
                message: "Parsing leveling guide...".into(),
                warning: None,
                result_role_id: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("insert run");
        run_id
    }

    fn parse_response(
        levels: &[&str],
        competencies: &[&str],
        cells: &[(&str, &str, &str)],
    ) -> serde_json::Value {
        let cells: Vec<serde_json::Value> = cells
            .iter()
            .map(|(l, c, r)| {
                json!({"level_name": l, "competency_name": c, "requirement": r})
            })
            .collect();
        let content =
            json!({"levels": levels, "competencies": competencies, "cells": cells}).to_string();
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn examples_response(examples: &[&str]) -> serde_json::Value {
        let content = json!({"examples": examples}).to_string();
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    // The built-in prompts phrase the two calls differently, which is what
    // the matchers key on.
    async fn mount_parse(server: &MockServer, response: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("leveling guide text to parse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(server)
            .await;
    }

    async fn mount_generate(server: &MockServer, response: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("career expectations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn full_run_builds_an_active_role() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1", "L2"],
                &["Technical", "Communication"],
                &[
                    ("L1", "Technical", "Writes code with guidance."),
                    ("L1", "Communication", "Asks questions early."),
                    ("L2", "Technical", "Owns medium features."),
                    ("L2", "Communication", "Writes design docs."),
                ],
            ),
        )
        .await;
        mount_generate(
            &env.server,
            examples_response(&["Example A", "Example B", "Example C"]),
        )
        .await;

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let role_id = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await
        .expect("run completes");

        let role = env
            .store
            .get_role(&role_id)
            .await
            .expect("get role")
            .expect("role exists");
        assert_eq!(role.state, RoleState::Active);
        assert_eq!(role.source_hash.len(), 64);

        let levels = env.store.list_levels(&role_id).await.expect("levels");
        assert_eq!(
            levels.iter().map(|l| l.name.as_str()).collect::<Vec<_>>(),
            vec!["L1", "L2"]
        );
        assert_eq!(levels[0].order_idx, 0);

        let competencies = env
            .store
            .list_competencies(&role_id)
            .await
            .expect("competencies");
        assert_eq!(competencies.len(), 2);

        let definitions = env
            .store
            .list_definitions(&role_id)
            .await
            .expect("definitions");
        assert_eq!(definitions.len(), 4);

        let examples = env.store.list_examples(&role_id).await.expect("examples");
        assert_eq!(examples.len(), 12);

        let metrics = env
            .store
            .list_quality_metrics(&role_id, None, None)
            .await
            .expect("metrics");
        assert_eq!(metrics.len(), 4);
        // Unseeded registry: fallback provenance is version 0 with no id.
        assert!(metrics.iter().all(|m| m.prompt_version == 0));
        assert!(metrics.iter().all(|m| m.prompt_id.is_none()));
        assert!(metrics.iter().all(|m| m.examples_count == 3));

        let run = env
            .store
            .get_run(&run_id)
            .await
            .expect("get run")
            .expect("run exists");
        assert_eq!(run.state, RunState::Processing);
        assert!(run.message.contains("Scoring"));
        assert_eq!(run.warning, None);
    }

    #[tokio::test]
    async fn resubmission_retires_the_previous_role() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1"],
                &["Technical"],
                &[("L1", "Technical", "Writes code.")],
            ),
        )
        .await;
        mount_generate(&env.server, examples_response(&["Example A"])).await;

        let request = request();
        let run_a = insert_run(&env.store, &request).await;
        let role_a = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_a,
            &request,
        )
        .await
        .expect("first run");

        let run_b = insert_run(&env.store, &request).await;
        let role_b = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_b,
            &request,
        )
        .await
        .expect("second run");

        let old = env
            .store
            .get_role(&role_a)
            .await
            .expect("get old role")
            .expect("old role exists");
        assert_eq!(old.state, RoleState::Retired);

        let active = env
            .store
            .find_active_role("company-1", "Software Engineer")
            .await
            .expect("find active")
            .expect("one active role");
        assert_eq!(active.id, role_b);

        // The retired snapshot's children stay readable.
        let old_definitions = env
            .store
            .list_definitions(&role_a)
            .await
            .expect("old definitions");
        assert_eq!(old_definitions.len(), 1);
    }

    #[tokio::test]
    async fn failed_cell_completes_with_zeroed_metrics() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1", "L2"],
                &["Technical"],
                &[
                    ("L1", "Technical", "Writes code with guidance."),
                    ("L2", "Technical", "Owns medium features."),
                ],
            ),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("career expectations"))
            .and(body_string_contains("Level: L1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(examples_response(&[
                "Ship a small feature",
                "Fix a reported bug",
            ])))
            .mount(&env.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("career expectations"))
            .and(body_string_contains("Level: L2"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string(r#"{"error": {"message": "The server had an error."}}"#),
            )
            .mount(&env.server)
            .await;

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let role_id = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await
        .expect("run completes despite the failed cell");

        let levels = env.store.list_levels(&role_id).await.expect("levels");
        let l2 = levels.iter().find(|l| l.name == "L2").expect("L2 exists");

        let examples = env.store.list_examples(&role_id).await.expect("examples");
        assert_eq!(examples.len(), 2);
        assert!(examples.iter().all(|e| e.level_id != l2.id));

        let metrics = env
            .store
            .list_quality_metrics(&role_id, None, None)
            .await
            .expect("metrics");
        assert_eq!(metrics.len(), 2);
        let failed = metrics
            .iter()
            .find(|m| m.level_id == l2.id)
            .expect("metrics row for the failed cell");
        assert_eq!(failed.examples_count, 0);
        assert_eq!(failed.uniqueness_score, 0.0);
    }

    #[tokio::test]
    async fn short_text_fails_before_any_call() {
        let env = test_env().await;
        let mut request = request();
        request.raw_text = "too short".into();
        let run_id = insert_run(&env.store, &request).await;

        let result = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await;

        assert!(matches!(result, Err(LevelGridError::Validation { .. })));
        let requests = env.server.received_requests().await.unwrap_or_default();
        assert!(requests.is_empty());
        let active = env
            .store
            .find_active_role("company-1", "Software Engineer")
            .await
            .expect("find active");
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn empty_grid_fails_without_writes() {
        let env = test_env().await;
        mount_parse(&env.server, parse_response(&["L1"], &["Technical"], &[])).await;

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let result = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await;

        assert!(matches!(result, Err(LevelGridError::Validation { .. })));
        let active = env
            .store
            .find_active_role("company-1", "Software Engineer")
            .await
            .expect("find active");
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn sparse_grid_attaches_a_warning_and_completes() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1", "L2"],
                &["Technical", "Communication"],
                &[("L1", "Technical", "Writes code.")],
            ),
        )
        .await;
        mount_generate(&env.server, examples_response(&["Example A"])).await;

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let role_id = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await
        .expect("sparse grid still completes");

        let run = env
            .store
            .get_run(&run_id)
            .await
            .expect("get run")
            .expect("run exists");
        assert_eq!(
            run.warning.as_deref(),
            Some("Warning: Parsing may be incomplete. Expected ~4 cells, found 1.")
        );

        let definitions = env
            .store
            .list_definitions(&role_id)
            .await
            .expect("definitions");
        assert_eq!(definitions.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_retires_the_skeleton() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1"],
                &["Technical"],
                &[("L1", "Technical", "Writes code.")],
            ),
        )
        .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let result = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &cancel,
            &run_id,
            &request,
        )
        .await;

        assert!(matches!(result, Err(LevelGridError::Cancelled)));
        let active = env
            .store
            .find_active_role("company-1", "Software Engineer")
            .await
            .expect("find active");
        assert!(active.is_none());
    }

    #[tokio::test]
    async fn duplicate_and_unknown_cells_are_dropped() {
        let env = test_env().await;
        mount_parse(
            &env.server,
            parse_response(
                &["L1"],
                &["Technical"],
                &[
                    ("L1", "Technical", "First requirement."),
                    ("L1", "Technical", "Second requirement, ignored."),
                    ("L9", "Technical", "Unknown level, dropped."),
                    ("L1", "Dancing", "Unknown competency, dropped."),
                ],
            ),
        )
        .await;
        mount_generate(&env.server, examples_response(&["Example A"])).await;

        let request = request();
        let run_id = insert_run(&env.store, &request).await;
        let role_id = process_guide(
            &env.store,
            &env.registry,
            &env.client,
            &options(),
            &CancellationToken::new(),
            &run_id,
            &request,
        )
        .await
        .expect("run completes");

        let definitions = env
            .store
            .list_definitions(&role_id)
            .await
            .expect("definitions");
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].requirement, "First requirement.");

        let metrics = env
            .store
            .list_quality_metrics(&role_id, None, None)
            .await
            .expect("metrics");
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn source_hash_is_stable_hex() {
        let a = source_hash("same text");
        let b = source_hash("same text");
        let c = source_hash("other text");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
