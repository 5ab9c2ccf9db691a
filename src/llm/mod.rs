//! LLM Client Boundary
//!
//! The core never talks to a model provider directly; it calls
//! [`LlmClient::complete`] and treats the response as an opaque string.
//! Concrete providers (OpenAI, Anthropic, OpenRouter, Ollama, ...) live
//! outside the core and plug in here.
//!
//! Every call-site in the core carries a rule-based fallback: an LLM
//! failure degrades the narrative quality of a result, it never fails the
//! run that asked for it.

use async_trait::async_trait;

use crate::error::CoreError;

/// A single completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f64,
}

impl CompletionRequest {
    /// Short factual completion — the shape the core's narrative call-sites
    /// want.
    pub fn narrative(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 300,
            temperature: 0.3,
        }
    }
}

/// Provider-agnostic completion contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logging
    fn provider(&self) -> &str;

    /// Complete the request, returning the model's text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CoreError>;
}

/// Canned-response client for tests and wiring examples.
pub struct MockLlm {
    response: String,
}

impl MockLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, CoreError> {
        Ok(self.response.clone())
    }
}

/// Client that always fails — exercises fallback paths in tests.
pub struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    fn provider(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, CoreError> {
        Err(CoreError::plugin_failure("llm", "provider unreachable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_canned_text() {
        let client = MockLlm::new("all is well");
        let out = client
            .complete(CompletionRequest::narrative("summarize"))
            .await
            .unwrap();
        assert_eq!(out, "all is well");
    }

    #[tokio::test]
    async fn test_failing_client_errors() {
        let client = FailingLlm;
        assert!(client
            .complete(CompletionRequest::narrative("summarize"))
            .await
            .is_err());
    }
}
