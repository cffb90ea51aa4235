use crate::config::{RetryConfig, RunConfig};
use crate::error::CompletionError;
use crate::models::{ChatTurn, Completion, Role, Usage};
use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestUserMessageArgs, CompletionUsage, CreateChatCompletionRequestArgs,
    CreateCompletionRequestArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use backoff::ExponentialBackoffBuilder;
use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// A language-model endpoint: submit a prompt, receive text and token counts
#[async_trait::async_trait]
pub trait CompletionClient: Send + Sync {
    /// Chat-style call with role-tagged turns
    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<Completion, CompletionError>;

    /// Text-completion call with a single flat prompt
    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, CompletionError>;
}

/// Client for any OpenAI-compatible endpoint.
///
/// async-openai's own 429 backoff is switched off: a rate-limited request
/// fails after one attempt and [`RetryingClient`] decides whether to retry.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(api_base: &str, api_key: &str, temperature: f32) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        let no_retry = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Self {
            client: Client::with_config(openai_config).with_backoff(no_retry),
            temperature,
        }
    }

    /// Build a client from the run configuration, reading the key from the environment
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self::new(&config.api_base, &api_key, config.temperature))
    }

    fn build_messages(turns: &[ChatTurn]) -> Result<Vec<ChatCompletionRequestMessage>, CompletionError> {
        let mut messages = Vec::with_capacity(turns.len());
        for turn in turns {
            let message: ChatCompletionRequestMessage = match turn.role {
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()?
                    .into(),
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

fn usage_from(usage: Option<CompletionUsage>) -> Usage {
    match usage {
        Some(usage) => Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
        None => Usage::default(),
    }
}

#[async_trait::async_trait]
impl CompletionClient for OpenAiClient {
    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<Completion, CompletionError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(Self::build_messages(turns)?)
            .temperature(self.temperature)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let text = match response.choices.first() {
            Some(choice) => choice.message.content.clone().unwrap_or_default(),
            None => {
                return Err(CompletionError::MalformedResponse(
                    "chat response had no choices".to_string(),
                ));
            }
        };

        Ok(Completion {
            text,
            usage: usage_from(response.usage),
        })
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, CompletionError> {
        let request = CreateCompletionRequestArgs::default()
            .model(model)
            .prompt(prompt)
            .temperature(self.temperature)
            .build()?;

        let response = self.client.completions().create(request).await?;

        let text = match response.choices.first() {
            Some(choice) => choice.text.clone(),
            None => {
                return Err(CompletionError::MalformedResponse(
                    "completion response had no choices".to_string(),
                ));
            }
        };

        Ok(Completion {
            text,
            usage: usage_from(response.usage),
        })
    }
}

/// Retries transient failures of an inner client with exponential backoff and jitter.
///
/// This is the only retry layer. A call blocks for at most `max_attempts`
/// requests plus the sleeps between them, each capped at 1.5x `max_delay_ms`.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryConfig,
}

impl<C: CompletionClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    async fn with_retries<F, Fut>(&self, op: &str, mut call: F) -> Result<Completion, CompletionError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Completion, CompletionError>> + Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(completion) => return Ok(completion),
                Err(err) => {
                    if !err.is_retryable() || attempt >= max_attempts {
                        return Err(err);
                    }

                    let delay = backoff_delay(&self.policy, attempt - 1);
                    warn!(
                        op,
                        attempt,
                        max_attempts,
                        code = err.code(),
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying: {}",
                        err
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `min(base * 2^attempt, max)` plus up to half of that again as jitter
fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.min(16));
    let delay = policy
        .base_delay()
        .saturating_mul(multiplier)
        .min(policy.max_delay());
    let jitter_ceiling = delay.as_millis() as u64 / 2;
    let jitter = rand::thread_rng().gen_range(0..=jitter_ceiling);
    delay + Duration::from_millis(jitter)
}

#[async_trait::async_trait]
impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    async fn chat(&self, model: &str, turns: &[ChatTurn]) -> Result<Completion, CompletionError> {
        debug!(model, turns = turns.len(), "chat request");
        self.with_retries("chat", || self.inner.chat(model, turns))
            .await
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Completion, CompletionError> {
        debug!(model, "completion request");
        self.with_retries("complete", || self.inner.complete(model, prompt))
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::stub::{Reply, StubClient};
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    fn rate_limited() -> CompletionError {
        CompletionError::RateLimited("slow down".to_string())
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let stub = StubClient::new([
            Reply::Fail(rate_limited()),
            Reply::Fail(CompletionError::Transport {
                message: "connection reset".to_string(),
                retryable: true,
            }),
            Reply::Text("1".to_string()),
        ]);
        let client = RetryingClient::new(stub, fast_policy(5));

        let completion = client
            .chat("gpt-test", &[ChatTurn::user("hi")])
            .await
            .unwrap();
        assert_eq!(completion.text, "1");
        assert_eq!(client.inner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let stub = StubClient::new([
            Reply::Fail(rate_limited()),
            Reply::Fail(rate_limited()),
            Reply::Fail(rate_limited()),
            Reply::Text("never reached".to_string()),
        ]);
        let client = RetryingClient::new(stub, fast_policy(3));

        let err = client.complete("davinci", "Q").await.unwrap_err();
        assert!(matches!(err, CompletionError::RateLimited(_)));
        assert_eq!(client.inner.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let stub = StubClient::new([
            Reply::Fail(CompletionError::Api {
                kind: "invalid_request_error".to_string(),
                message: "Incorrect API key".to_string(),
                retryable: false,
            }),
            Reply::Text("never reached".to_string()),
        ]);
        let client = RetryingClient::new(stub, fast_policy(10));

        let err = client.chat("gpt-test", &[]).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(client.inner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let stub = StubClient::texts(["ok"]);
        let client = RetryingClient::new(stub, fast_policy(0));

        let completion = client.complete("davinci", "Q").await.unwrap();
        assert_eq!(completion.text, "ok");
    }

    #[test]
    fn test_backoff_delay_grows_and_is_capped() {
        let policy = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };

        let first = backoff_delay(&policy, 0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));

        let third = backoff_delay(&policy, 2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));

        let capped = backoff_delay(&policy, 30);
        assert!(capped >= Duration::from_millis(1_000) && capped <= Duration::from_millis(1_500));
    }

    const CHAT_BODY: &str = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1700000000,
        "model": "gpt-3.5-turbo-0613",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "1"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 21, "completion_tokens": 1, "total_tokens": 22}
    }"#;

    const COMPLETION_BODY: &str = r#"{
        "id": "cmpl-1",
        "object": "text_completion",
        "created": 1700000000,
        "model": "davinci",
        "choices": [{
            "text": " 3\nScore: 3",
            "index": 0,
            "logprobs": null,
            "finish_reason": "length"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13}
    }"#;

    #[tokio::test]
    async fn test_openai_chat_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(CHAT_BODY)
            .create_async()
            .await;

        let client = OpenAiClient::new(&server.url(), "test-key", 0.7);
        let completion = client
            .chat(
                "gpt-3.5-turbo-0613",
                &[
                    ChatTurn::user("Respond with 1"),
                    ChatTurn::assistant("0"),
                    ChatTurn::user("Why did you score it a 0?"),
                ],
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(completion.text, "1");
        assert_eq!(
            completion.usage,
            Usage {
                prompt_tokens: 21,
                completion_tokens: 1,
                total_tokens: 22,
            }
        );
    }

    #[tokio::test]
    async fn test_openai_completion_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(COMPLETION_BODY)
            .create_async()
            .await;

        let client = OpenAiClient::new(&server.url(), "test-key", 0.7);
        let completion = client.complete("davinci", "Q\nResponse: A\nScore:").await.unwrap();

        mock.assert_async().await;
        assert_eq!(completion.text, " 3\nScore: 3");
        assert_eq!(completion.usage.total_tokens, 13);
    }

    #[tokio::test]
    async fn test_openai_auth_failure_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "param": null, "code": "invalid_api_key"}}"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(&server.url(), "bad-key", 0.7);
        let err = client
            .chat("gpt-3.5-turbo-0613", &[ChatTurn::user("hi")])
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn test_openai_empty_choices_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": "x", "object": "chat.completion", "created": 1, "model": "m", "choices": []}"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(&server.url(), "test-key", 0.7);
        let err = client.chat("m", &[ChatTurn::user("hi")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::MalformedResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_gateway_error_page_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_header("content-type", "text/html")
            .with_body("<html><body><h1>503 Service Temporarily Unavailable</h1></body></html>")
            .expect(3)
            .create_async()
            .await;

        let client = RetryingClient::new(
            OpenAiClient::new(&server.url(), "test-key", 0.7),
            fast_policy(3),
        );
        let err = client
            .chat("gpt-3.5-turbo-0613", &[ChatTurn::user("hi")])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, CompletionError::UndecodableBody(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces_after_one_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error": {"message": "Rate limit reached for requests", "type": "requests", "param": null, "code": "rate_limit_exceeded"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = OpenAiClient::new(&server.url(), "test-key", 0.7);
        let err = client
            .chat("gpt-3.5-turbo-0613", &[ChatTurn::user("hi")])
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, CompletionError::RateLimited(_)));
    }

    #[test]
    fn test_from_config_missing_env_var() {
        let config = RunConfig {
            api_key_env: "ANSWER_GRADER_CLIENT_TEST_UNSET".to_string(),
            ..RunConfig::default()
        };
        let result = OpenAiClient::from_config(&config);
        assert!(result.is_err());
    }
}
