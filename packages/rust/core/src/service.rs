//! Run service: submission, status polling, cancellation, and the read
//! surfaces over stored role grids.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info};

use levelgrid_genai::GenerationClient;
use levelgrid_prompts::PromptRegistry;
use levelgrid_shared::{
    CancellationToken, CompetencyRecord, DefinitionRecord, ExampleRecord, GenerationOptions,
    LevelGridError, LevelRecord, QualityRecord, Result, RoleRecord, RunId, RunRecord, RunState,
};
use levelgrid_storage::Store;

use crate::pipeline::{self, SubmitGuide};

/// Full grid for one role: the role row plus every child table.
#[derive(Debug, Clone)]
pub struct RoleDetail {
    pub role: RoleRecord,
    pub levels: Vec<LevelRecord>,
    pub competencies: Vec<CompetencyRecord>,
    pub definitions: Vec<DefinitionRecord>,
    pub examples: Vec<ExampleRecord>,
}

/// Orchestrates guide processing runs against one store and one generation
/// endpoint. Cheap to clone; clones share the store and the active-run set.
#[derive(Clone)]
pub struct GuideService {
    store: Arc<Store>,
    registry: PromptRegistry,
    client: GenerationClient,
    options: GenerationOptions,
    active_runs: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl GuideService {
    pub fn new(store: Arc<Store>, client: GenerationClient, options: GenerationOptions) -> Self {
        let registry = PromptRegistry::new(store.clone());
        Self {
            store,
            registry,
            client,
            options,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The prompt registry backing this service's runs.
    pub fn registry(&self) -> &PromptRegistry {
        &self.registry
    }

    /// Create a run row and spawn the pipeline in the background. Returns
    /// immediately; callers poll [`GuideService::run_status`].
    pub async fn submit_guide(&self, request: SubmitGuide) -> Result<RunId> {
        let run_id = RunId::new();
        let now = Utc::now();
        let run = RunRecord {
            id: run_id.to_string(),
            company_id: request.company_id.clone(),
            role_name: request.role_name.clone(),
            state: RunState::Processing,
            message: "Parsing leveling guide...".into(),
            warning: None,
            result_role_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_run(&run).await?;

        let cancel = CancellationToken::new();
        {
            let mut runs = self.active_runs.lock().await;
            runs.insert(run_id.to_string(), cancel.clone());
        }

        let service = self.clone();
        let id = run_id.to_string();
        tokio::spawn(async move {
            service.run_to_completion(&id, &request, &cancel).await;
            let mut runs = service.active_runs.lock().await;
            runs.remove(&id);
        });

        info!(run_id = %run_id, role_name = %request.role_name, "guide run submitted");
        Ok(run_id)
    }

    async fn run_to_completion(
        &self,
        run_id: &str,
        request: &SubmitGuide,
        cancel: &CancellationToken,
    ) {
        let result = pipeline::process_guide(
            &self.store,
            &self.registry,
            &self.client,
            &self.options,
            cancel,
            run_id,
            request,
        )
        .await;

        let update = match result {
            Ok(role_id) => {
                info!(run_id, role_id = %role_id, "run completed");
                self.store
                    .update_run(run_id, RunState::Completed, "Processing complete", Some(&role_id))
                    .await
            }
            Err(e) => {
                error!(run_id, error = %e, "run failed");
                self.store
                    .update_run(run_id, RunState::Failed, &e.user_message(), None)
                    .await
            }
        };
        if let Err(e) = update {
            error!(run_id, error = %e, "failed to record final run state");
        }
    }

    /// One status snapshot for a run.
    pub async fn run_status(&self, run_id: &RunId) -> Result<RunRecord> {
        match self.store.get_run(&run_id.to_string()).await? {
            Some(run) => Ok(run),
            None => Err(LevelGridError::not_found(format!("run {run_id}"))),
        }
    }

    /// Request cancellation of an in-process run. Takes effect at the next
    /// generation batch boundary. Returns false when the run is not
    /// currently executing in this process.
    pub async fn cancel_run(&self, run_id: &RunId) -> bool {
        let runs = self.active_runs.lock().await;
        match runs.get(&run_id.to_string()) {
            Some(token) => {
                token.cancel();
                info!(run_id = %run_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Quality metrics for a role, optionally filtered by prompt provenance.
    pub async fn quality_metrics(
        &self,
        role_id: &str,
        prompt_id: Option<&str>,
        prompt_version: Option<i64>,
    ) -> Result<Vec<QualityRecord>> {
        if self.store.get_role(role_id).await?.is_none() {
            return Err(LevelGridError::not_found(format!("role {role_id}")));
        }
        self.store
            .list_quality_metrics(role_id, prompt_id, prompt_version)
            .await
    }

    /// The full grid for one role, retired snapshots included.
    pub async fn role_detail(&self, role_id: &str) -> Result<RoleDetail> {
        let role = match self.store.get_role(role_id).await? {
            Some(role) => role,
            None => return Err(LevelGridError::not_found(format!("role {role_id}"))),
        };
        Ok(RoleDetail {
            levels: self.store.list_levels(role_id).await?,
            competencies: self.store.list_competencies(role_id).await?,
            definitions: self.store.list_definitions(role_id).await?,
            examples: self.store.list_examples(role_id).await?,
            role,
        })
    }

    /// Active roles for a company, ordered by name.
    pub async fn active_roles(&self, company_id: &str) -> Result<Vec<RoleRecord>> {
        self.store.list_active_roles(company_id).await
    }

    /// Delete terminal run rows older than the cutoff. Returns the count.
    pub async fn evict_runs(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
        self.store.evict_runs(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GUIDE_TEXT: &str = "Level | Technical Skills | Communication\n\
        L1 | Writes well-scoped code with guidance. | Asks questions early and often.\n\
        L2 | Owns medium features end to end. | Writes clear design docs for review.";

    async fn test_service(server: &MockServer) -> GuideService {
        let db_path =
            std::env::temp_dir().join(format!("levelgrid_service_test_{}.db", Uuid::now_v7()));
        let store = Arc::new(Store::open(&db_path).await.expect("open store"));
        let client = GenerationClient::new("sk-test", server.uri(), StdDuration::from_secs(5))
            .expect("client");
        let options = GenerationOptions {
            batch_size: 20,
            max_workers: 20,
        };
        GuideService::new(store, client, options)
    }

    fn request() -> SubmitGuide {
        SubmitGuide {
            company_id: "company-1".into(),
            role_name: "Software Engineer".into(),
            company_url: "https://example.com".into(),
            raw_text: GUIDE_TEXT.into(),
        }
    }

    fn chat_response(content: serde_json::Value) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content.to_string()}}]})
    }

    async fn mount_parse(server: &MockServer, delay: Option<StdDuration>) {
        let content = json!({
            "levels": ["L1", "L2"],
            "competencies": ["Technical"],
            "cells": [
                {"level_name": "L1", "competency_name": "Technical", "requirement": "Writes code."},
                {"level_name": "L2", "competency_name": "Technical", "requirement": "Owns features."}
            ]
        });
        let mut template = ResponseTemplate::new(200).set_body_json(chat_response(content));
        if let Some(delay) = delay {
            template = template.set_delay(delay);
        }
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("leveling guide text to parse"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    async fn mount_generate(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("career expectations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
                json!({"examples": ["Example A", "Example B", "Example C"]}),
            )))
            .mount(server)
            .await;
    }

    async fn poll_until_terminal(service: &GuideService, run_id: &RunId) -> RunRecord {
        for _ in 0..250 {
            let run = service.run_status(run_id).await.expect("status");
            if run.state.is_terminal() {
                return run;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        panic!("run never reached a terminal state");
    }

    #[tokio::test]
    async fn submitted_run_completes_and_links_the_role() {
        let server = MockServer::start().await;
        mount_parse(&server, None).await;
        mount_generate(&server).await;

        let service = test_service(&server).await;
        let run_id = service.submit_guide(request()).await.expect("submit");

        let run = poll_until_terminal(&service, &run_id).await;
        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.message, "Processing complete");
        let role_id = run.result_role_id.expect("role id recorded");

        let detail = service.role_detail(&role_id).await.expect("detail");
        assert_eq!(detail.levels.len(), 2);
        assert_eq!(detail.competencies.len(), 1);
        assert_eq!(detail.definitions.len(), 2);
        assert_eq!(detail.examples.len(), 6);

        let roles = service.active_roles("company-1").await.expect("roles");
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].id, role_id);

        let metrics = service
            .quality_metrics(&role_id, None, None)
            .await
            .expect("metrics");
        assert_eq!(metrics.len(), 2);
    }

    #[tokio::test]
    async fn failed_run_records_a_sanitized_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#,
            ))
            .mount(&server)
            .await;

        let service = test_service(&server).await;
        let run_id = service.submit_guide(request()).await.expect("submit");

        let run = poll_until_terminal(&service, &run_id).await;
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(
            run.message,
            "Service temporarily busy. Please try again in a few moments."
        );
        assert_eq!(run.result_role_id, None);
    }

    #[tokio::test]
    async fn cancelled_run_fails_with_the_cancel_message() {
        let server = MockServer::start().await;
        // The parse delay keeps the run inside the pipeline long enough for
        // the cancel request to land before the first generation batch.
        mount_parse(&server, Some(StdDuration::from_millis(500))).await;
        mount_generate(&server).await;

        let service = test_service(&server).await;
        let run_id = service.submit_guide(request()).await.expect("submit");

        assert!(service.cancel_run(&run_id).await);

        let run = poll_until_terminal(&service, &run_id).await;
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.message, "Processing was cancelled.");
    }

    #[tokio::test]
    async fn cancel_of_unknown_run_returns_false() {
        let server = MockServer::start().await;
        let service = test_service(&server).await;
        assert!(!service.cancel_run(&RunId::new()).await);
    }

    #[tokio::test]
    async fn status_of_unknown_run_is_not_found() {
        let server = MockServer::start().await;
        let service = test_service(&server).await;
        let result = service.run_status(&RunId::new()).await;
        assert!(matches!(result, Err(LevelGridError::NotFound { .. })));
    }

    #[tokio::test]
    async fn detail_of_unknown_role_is_not_found() {
        let server = MockServer::start().await;
        let service = test_service(&server).await;
        let result = service.role_detail("no-such-role").await;
        assert!(matches!(result, Err(LevelGridError::NotFound { .. })));
        let result = service.quality_metrics("no-such-role", None, None).await;
        assert!(matches!(result, Err(LevelGridError::NotFound { .. })));
    }

    #[tokio::test]
    async fn evict_runs_clears_terminal_rows() {
        let server = MockServer::start().await;
        mount_parse(&server, None).await;
        mount_generate(&server).await;

        let service = test_service(&server).await;
        let run_id = service.submit_guide(request()).await.expect("submit");
        poll_until_terminal(&service, &run_id).await;

        // Terminal but recent: a 30-day horizon keeps it.
        let evicted = service.evict_runs(30).await.expect("evict");
        assert_eq!(evicted, 0);

        // Zero-day horizon evicts anything already terminal.
        let evicted = service.evict_runs(0).await.expect("evict");
        assert_eq!(evicted, 1);
        let result = service.run_status(&run_id).await;
        assert!(matches!(result, Err(LevelGridError::NotFound { .. })));
    }
}
