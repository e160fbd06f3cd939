//! HTTP client for the OpenAI-compatible chat completions API.
//!
//! Every pipeline call is a single structured-output completion: system plus
//! user message, JSON-object response format, and the content deserialized
//! into the caller's type. Transport and API failures are classified into
//! the error taxonomy (rate limit, quota, timeout, connection) so run status
//! can surface a category message instead of raw detail.

use std::time::Duration;

use levelgrid_shared::{LevelGridError, OpenAiConfig, Result, resolve_api_key};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Client for one OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GenerationClient {
    /// Create a client with an explicit key, base URL, and per-call timeout.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LevelGridError::config(format!("failed to build HTTP client: {e}")))?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from the OpenAI config section, reading the API key
    /// from the configured environment variable.
    pub fn from_config(openai: &OpenAiConfig) -> Result<Self> {
        let api_key = resolve_api_key(openai)?;
        Self::new(
            api_key,
            openai.base_url.as_str(),
            Duration::from_secs(openai.timeout_secs),
        )
    }

    /// One structured-output chat call: send the system and user messages,
    /// demand a JSON object response, and deserialize the content into `T`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        model: &str,
        temperature: f64,
        system_message: &str,
        user_message: &str,
    ) -> Result<T> {
        let body = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_message,
                },
                Message {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        debug!(model, temperature, "requesting chat completion");
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_api_error(status, &error_text));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| LevelGridError::Generation(format!("invalid completion payload: {e}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LevelGridError::Generation("completion had no choices".into()))?;

        serde_json::from_str(&content)
            .map_err(|e| LevelGridError::parse(format!("malformed structured response: {e}")))
    }
}

impl std::fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

fn classify_transport_error(e: reqwest::Error) -> LevelGridError {
    if e.is_timeout() {
        LevelGridError::Timeout
    } else if e.is_connect() {
        LevelGridError::Connection(e.to_string())
    } else {
        LevelGridError::Generation(e.to_string())
    }
}

fn classify_api_error(status: StatusCode, body: &str) -> LevelGridError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        // 429 is either a transient rate limit or an exhausted quota
        if body.contains("insufficient_quota") {
            return LevelGridError::QuotaExceeded;
        }
        return LevelGridError::RateLimited;
    }
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(api_error) => api_error.error.message,
        Err(_) => body.to_string(),
    };
    LevelGridError::Generation(format!("{}: {message}", status.as_u16()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct ExamplesPayload {
        examples: Vec<String>,
    }

    fn chat_body(content: serde_json::Value) -> serde_json::Value {
        json!({
            "choices": [
                {"message": {"role": "assistant", "content": content.to_string()}}
            ]
        })
    }

    fn test_client(server: &MockServer) -> GenerationClient {
        GenerationClient::new("sk-test", server.uri(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn completes_and_decodes_structured_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_string_contains("json_object"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(json!({
                "examples": ["Led the billing migration", "Wrote the rollout design doc"]
            }))))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let payload: ExamplesPayload = client
            .complete_json("gpt-4o", 0.7, "You are a coach.", "Write examples.")
            .await
            .expect("completion succeeds");
        assert_eq!(payload.examples.len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"error": {"message": "Rate limit reached for gpt-4o", "type": "requests"}}"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        assert!(matches!(result, Err(LevelGridError::RateLimited)));
    }

    #[tokio::test]
    async fn exhausted_quota_maps_to_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"error": {"message": "You exceeded your current quota.", "type": "insufficient_quota"}}"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        assert!(matches!(result, Err(LevelGridError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn server_error_maps_to_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                r#"{"error": {"message": "The server had an error."}}"#,
            ))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        match result {
            Err(LevelGridError::Generation(message)) => {
                assert!(message.contains("500"));
                assert!(message.contains("server had an error"));
            }
            other => panic!("expected generation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_content_maps_to_parse() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "here are your examples!"}}
                ]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        assert!(matches!(result, Err(LevelGridError::Parse { .. })));
    }

    #[tokio::test]
    async fn empty_choices_is_a_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = test_client(&server);
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        assert!(matches!(result, Err(LevelGridError::Generation(_))));
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_body(json!({"examples": []})))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client =
            GenerationClient::new("sk-test", server.uri(), Duration::from_millis(200)).unwrap();
        let result: Result<ExamplesPayload> =
            client.complete_json("gpt-4o", 0.7, "s", "u").await;
        assert!(matches!(result, Err(LevelGridError::Timeout)));
    }

    #[test]
    fn debug_redacts_the_api_key() {
        let client =
            GenerationClient::new("sk-secret", "https://api.openai.com/v1", Duration::from_secs(5))
                .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
