//! Batched parallel example generation, one call per grid cell.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use levelgrid_genai::GenerationClient;
use levelgrid_prompts::{ResolvedPrompt, render_template};
use levelgrid_shared::{CancellationToken, GenerationOptions, LevelGridError, Result};

/// Maximum examples kept per cell; longer responses are truncated.
pub const MAX_EXAMPLES_PER_CELL: usize = 3;

/// Identity of one grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub level_name: String,
    pub competency_name: String,
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.level_name, self.competency_name)
    }
}

/// One generation task: a cell and its requirement text.
#[derive(Debug, Clone)]
pub struct CellTask {
    pub key: CellKey,
    pub requirement: String,
}

/// Role context shared by every cell of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub company_url: String,
    pub role_name: String,
}

/// Outcome for one cell: up to three examples, or none plus the failure.
#[derive(Debug, Clone, Default)]
pub struct CellOutcome {
    pub examples: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExamplesPayload {
    #[serde(default)]
    examples: Vec<String>,
}

/// Generate examples for every cell, in fixed-size batches with bounded
/// concurrency inside each batch.
///
/// The prompt is resolved once by the caller so all cells of a run share
/// one version. A failed or panicked cell records an empty outcome with the
/// error and never aborts the run; the returned map covers every submitted
/// cell. Cancellation is honored between batches, leaving in-flight calls
/// to finish.
pub async fn generate_examples(
    client: &GenerationClient,
    prompt: &ResolvedPrompt,
    ctx: &RunContext,
    cells: &[CellTask],
    options: &GenerationOptions,
    cancel: &CancellationToken,
) -> Result<HashMap<CellKey, CellOutcome>> {
    let batch_size = options.batch_size.max(1) as usize;
    let max_workers = options.max_workers.max(1) as usize;
    let total_batches = cells.len().div_ceil(batch_size);

    let semaphore = Arc::new(Semaphore::new(max_workers));
    let mut outcomes: HashMap<CellKey, CellOutcome> = HashMap::with_capacity(cells.len());

    info!(
        cells = cells.len(),
        batch_size, max_workers, "starting example generation"
    );

    for (batch_idx, batch) in cells.chunks(batch_size).enumerate() {
        if cancel.is_cancelled() {
            info!(
                batch = batch_idx + 1,
                total_batches, "cancellation requested, aborting run"
            );
            return Err(LevelGridError::Cancelled);
        }

        debug!(
            batch = batch_idx + 1,
            total_batches,
            cells = batch.len(),
            "processing batch"
        );

        let mut handles = Vec::with_capacity(batch.len());
        for task in batch {
            let client = client.clone();
            let prompt = prompt.clone();
            let ctx = ctx.clone();
            let task = task.clone();
            let sem = semaphore.clone();
            let key = task.key.clone();

            handles.push((
                key,
                tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    generate_cell(&client, &prompt, &ctx, &task).await
                }),
            ));
        }

        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(examples)) => CellOutcome {
                    examples,
                    error: None,
                },
                Ok(Err(e)) => {
                    warn!(cell = %key, error = %e, "example generation failed for cell");
                    CellOutcome {
                        examples: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
                Err(e) => {
                    warn!(cell = %key, error = %e, "example generation task panicked");
                    CellOutcome {
                        examples: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.insert(key, outcome);
        }
    }

    Ok(outcomes)
}

/// One generation call for one cell.
async fn generate_cell(
    client: &GenerationClient,
    prompt: &ResolvedPrompt,
    ctx: &RunContext,
    task: &CellTask,
) -> Result<Vec<String>> {
    let variables = HashMap::from([
        ("company_url", ctx.company_url.clone()),
        ("role_name", ctx.role_name.clone()),
        ("level_name", task.key.level_name.clone()),
        ("competency_name", task.key.competency_name.clone()),
        ("requirement", task.requirement.clone()),
    ]);
    let user_message = render_template(&prompt.user_message_template, &variables);

    let payload: ExamplesPayload = client
        .complete_json(
            &prompt.model,
            prompt.temperature,
            &prompt.system_message,
            &user_message,
        )
        .await?;

    let mut examples = payload.examples;
    examples.truncate(MAX_EXAMPLES_PER_CELL);
    Ok(examples)
}
