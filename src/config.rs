//! Environment configuration

use crate::llm::{LlmConfig, ToolChoice};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Read and parse an optional variable through `lookup`
pub fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        })
}

/// Runtime configuration for the `threadrun` binary
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub tool_choice: ToolChoice,
    /// Iteration budget per session; `None` runs until stopped
    pub max_iterations: Option<u32>,
    pub system_prompt: String,
    /// User message appended between iterations; empty means none
    pub continue_instructions: String,
    pub llm: LlmConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|var: &str| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("THREADRUN_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.threadrun/threadrun.db"))
            },
            PathBuf::from,
        );

        Ok(Self {
            db_path,
            model: lookup("THREADRUN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: parse_var(lookup, "THREADRUN_TEMPERATURE")?
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: Some(
                parse_var(lookup, "THREADRUN_MAX_TOKENS")?.unwrap_or(DEFAULT_MAX_TOKENS),
            ),
            tool_choice: parse_var(lookup, "THREADRUN_TOOL_CHOICE")?.unwrap_or_default(),
            max_iterations: parse_var(lookup, "THREADRUN_MAX_ITERATIONS")?,
            system_prompt: lookup("THREADRUN_SYSTEM_PROMPT").unwrap_or_default(),
            continue_instructions: lookup("THREADRUN_CONTINUE_INSTRUCTIONS").unwrap_or_default(),
            llm: LlmConfig::from_lookup(lookup)?,
        })
    }
}
