//! Provider configuration from the environment

use super::openai::DEFAULT_BASE_URL;
use super::RetryPolicy;
use crate::config::{parse_var, ConfigError};

/// Configuration for the LLM provider stack
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    /// Chat completions base URL, without the `/chat/completions` suffix
    pub base_url: String,
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_attempts: RetryPolicy::default().max_attempts,
        }
    }
}

impl LlmConfig {
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            openai_api_key: lookup("OPENAI_API_KEY"),
            base_url: lookup("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            max_attempts: parse_var(lookup, "LLM_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }
}
