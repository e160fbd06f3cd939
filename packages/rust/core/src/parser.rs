//! Structuring call: raw guide text in, level/competency grid out.

use std::collections::HashMap;

use tracing::info;

use levelgrid_genai::GenerationClient;
use levelgrid_prompts::{PARSE_GUIDE_KEY, PromptRegistry, render_template};
use levelgrid_shared::{ParsedGuide, Result};

/// Parse raw document text into a structured grid with one generation call.
///
/// The `parse_guide` prompt is resolved through the registry, falling back
/// to the built-in version when none is stored. Level and competency
/// ordering in the response is preserved exactly; structural validation
/// happens downstream.
pub async fn parse_guide(
    registry: &PromptRegistry,
    client: &GenerationClient,
    raw_text: &str,
) -> Result<ParsedGuide> {
    let prompt = registry.resolve_or_default(PARSE_GUIDE_KEY).await?;

    let variables = HashMap::from([("raw_text", raw_text.to_string())]);
    let user_message = render_template(&prompt.user_message_template, &variables);

    let guide: ParsedGuide = client
        .complete_json(
            &prompt.model,
            prompt.temperature,
            &prompt.system_message,
            &user_message,
        )
        .await?;

    info!(
        levels = guide.levels.len(),
        competencies = guide.competencies.len(),
        cells = guide.cells.len(),
        "parsed leveling guide"
    );

    Ok(guide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use levelgrid_shared::LevelGridError;
    use levelgrid_storage::Store;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_registry() -> PromptRegistry {
        let db_path =
            std::env::temp_dir().join(format!("levelgrid_parser_test_{}.db", Uuid::now_v7()));
        let store = Store::open(&db_path).await.expect("open store");
        PromptRegistry::new(Arc::new(store))
    }

    fn test_client(server: &MockServer) -> GenerationClient {
        GenerationClient::new("sk-test", server.uri(), Duration::from_secs(5)).expect("client")
    }

    fn grid_content() -> String {
        json!({
            "levels": ["L1 - Junior", "L2 - Mid", "L3 - Senior"],
            "competencies": ["Technical Skills", "Communication"],
            "cells": [
                {
                    "level_name": "L1 - Junior",
                    "competency_name": "Technical Skills",
                    "requirement": "Writes well-scoped code with guidance."
                },
                {
                    "level_name": "L3 - Senior",
                    "competency_name": "Communication",
                    "requirement": "Presents technical tradeoffs to the team."
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn decodes_grid_and_preserves_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("our quarterly leveling rubric"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": grid_content()}}]
            })))
            .mount(&server)
            .await;

        let registry = test_registry().await;
        let client = test_client(&server);
        let guide = parse_guide(&registry, &client, "our quarterly leveling rubric")
            .await
            .expect("parse succeeds");

        assert_eq!(guide.levels, vec!["L1 - Junior", "L2 - Mid", "L3 - Senior"]);
        assert_eq!(guide.competencies, vec!["Technical Skills", "Communication"]);
        assert_eq!(guide.cells.len(), 2);
        assert_eq!(guide.cells[0].level_name, "L1 - Junior");
    }

    #[tokio::test]
    async fn works_with_an_unseeded_registry() {
        // No stored prompt: the built-in fallback still renders the raw
        // text into the request.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("leveling guide text to parse"))
            .and(body_string_contains("unique-marker-text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": grid_content()}}]
            })))
            .mount(&server)
            .await;

        let registry = test_registry().await;
        let client = test_client(&server);
        let guide = parse_guide(&registry, &client, "unique-marker-text")
            .await
            .expect("fallback prompt used");
        assert_eq!(guide.levels.len(), 3);
    }

    #[tokio::test]
    async fn missing_keys_default_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": r#"{"levels": ["L1"]}"#}}]
            })))
            .mount(&server)
            .await;

        let registry = test_registry().await;
        let client = test_client(&server);
        let guide = parse_guide(&registry, &client, "text").await.expect("parse");
        assert_eq!(guide.levels, vec!["L1"]);
        assert!(guide.competencies.is_empty());
        assert!(guide.cells.is_empty());
    }

    #[tokio::test]
    async fn malformed_content_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "not even json"}}]
            })))
            .mount(&server)
            .await;

        let registry = test_registry().await;
        let client = test_client(&server);
        let result = parse_guide(&registry, &client, "text").await;
        assert!(matches!(result, Err(LevelGridError::Parse { .. })));
    }
}
