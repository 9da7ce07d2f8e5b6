//! LLM provider abstraction
//!
//! One provider (OpenAI-compatible chat completions) stacked under a retry
//! layer and a logging layer. The controller only sees `LlmService`.

mod config;
mod error;
mod openai;
mod retry;
mod types;

pub use config::LlmConfig;
pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAIService;
pub use retry::{RetryPolicy, RetryingService};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Provider name for logs
    fn provider(&self) -> &str;
}

/// Build the production service stack: provider, retries, logging
pub fn build_service(config: &LlmConfig) -> Result<Arc<dyn LlmService>, LlmError> {
    let provider: Arc<dyn LlmService> = Arc::new(OpenAIService::new(config)?);
    let retrying = Arc::new(RetryingService::new(provider, config.retry_policy()));
    Ok(Arc::new(LoggingService::new(retrying)))
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    provider = %self.inner.provider(),
                    model = %request.model,
                    tool_choice = %request.tool_choice,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    tool_calls = response.tool_calls.len(),
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.inner.provider(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}
