//! Run and provider configuration.
//!
//! Both structs have defaults and can be read from environment variables:
//! - `BUMPFIX_MAX_ITERATIONS`: outer loop bound (default 20)
//! - `BUMPFIX_TIMEOUT_SECS`: wall-clock bound for one run (default 600)
//! - `BUMPFIX_CONTEXT_BUDGET`: prompt size in characters (default 28000)
//! - `BUMPFIX_LLM_TIMEOUT_SECS`: deadline for one model call (default 120)
//! - `BUMPFIX_BUILD_TIMEOUT_SECS`: deadline for one build or package call (default 300)
//! - `LLM_PROVIDER`, `LLM_MODEL`, `LLM_API_BASE_URL`, `LLM_API_KEY`

use std::str::FromStr;
use std::time::Duration;

use crate::error::EngineError;

pub const DEFAULT_MAX_ITERATIONS: usize = 20;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CONTEXT_BUDGET: usize = 28_000;
pub const DEFAULT_LLM_CALL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_BUILD_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounds for one upgrade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub max_iterations: usize,
    pub timeout: Duration,
    pub context_budget: usize,
    pub llm_call_timeout: Duration,
    pub build_call_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: DEFAULT_TIMEOUT,
            context_budget: DEFAULT_CONTEXT_BUDGET,
            llm_call_timeout: DEFAULT_LLM_CALL_TIMEOUT,
            build_call_timeout: DEFAULT_BUILD_CALL_TIMEOUT,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; unset keys keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EngineError> {
        let defaults = Self::default();
        let max_iterations = parse_or(&lookup, "BUMPFIX_MAX_ITERATIONS", defaults.max_iterations)?;
        if max_iterations == 0 {
            return Err(EngineError::Config(
                "BUMPFIX_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_iterations,
            timeout: secs_or(&lookup, "BUMPFIX_TIMEOUT_SECS", defaults.timeout)?,
            context_budget: parse_or(&lookup, "BUMPFIX_CONTEXT_BUDGET", defaults.context_budget)?,
            llm_call_timeout: secs_or(&lookup, "BUMPFIX_LLM_TIMEOUT_SECS", defaults.llm_call_timeout)?,
            build_call_timeout: secs_or(
                &lookup,
                "BUMPFIX_BUILD_TIMEOUT_SECS",
                defaults.build_call_timeout,
            )?,
        })
    }
}

/// Which OpenAI-compatible endpoint to talk to, and as whom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LlmConfig {
    /// `openai` (default), `openrouter` or `openai_compatible`.
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Required for `openai_compatible`.
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            provider: non_empty("LLM_PROVIDER"),
            model: non_empty("LLM_MODEL"),
            api_base_url: non_empty("LLM_API_BASE_URL"),
            api_key: non_empty("LLM_API_KEY"),
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, EngineError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("{key}: invalid value '{raw}'"))),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, EngineError> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
