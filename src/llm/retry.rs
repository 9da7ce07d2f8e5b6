//! Retry layer for transient provider failures
//!
//! Rate limits wait for the server's hint (or a fixed pause); other
//! retryable errors wait a shorter fixed pause. In JSON mode a reply that is
//! not valid JSON counts as a retryable failure and is asked for again.

use super::{LlmError, LlmRequest, LlmResponse, LlmService};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after a rate limit without a `retry-after` hint
    pub rate_limit_delay: Duration,
    /// Wait after any other retryable error
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_delay: Duration::from_secs(30),
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, error: &LlmError) -> Duration {
        match error.kind {
            super::LlmErrorKind::RateLimit => error.retry_after.unwrap_or(self.rate_limit_delay),
            _ => self.retry_delay,
        }
    }
}

pub struct RetryingService {
    inner: Arc<dyn LlmService>,
    policy: RetryPolicy,
}

impl RetryingService {
    pub fn new(inner: Arc<dyn LlmService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self.inner.complete(request).await?;
        if request.json_mode && !response.has_tool_calls() {
            let text = response.text.trim();
            if text.is_empty() {
                return Err(LlmError::invalid_output("Empty reply in JSON mode"));
            }
            if let Err(e) = serde_json::from_str::<serde_json::Value>(text) {
                return Err(LlmError::invalid_output(format!(
                    "Reply is not valid JSON: {e}"
                )));
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmService for RetryingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let mut attempt = 1;
        loop {
            match self.attempt(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.kind.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(&e);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = %delay.as_millis(),
                        error = %e,
                        "Retrying LLM request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(if attempt > 1 {
                        LlmError {
                            message: format!("{} (after {attempt} attempts)", e.message),
                            ..e
                        }
                    } else {
                        e
                    });
                }
            }
        }
    }

    fn provider(&self) -> &str {
        self.inner.provider()
    }
}
