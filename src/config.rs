use std::env;
use std::str::FromStr;

use crate::{
    constants::{
        DEFAULT_GEMINI_MODEL, DEFAULT_LOOP_ITERATION_LIMIT, DEFAULT_RECURSION_LIMIT,
        MAX_EXECUTION_TIME_MS,
    },
    core::traits::sandbox::ExecutionLimits,
};

pub const TIME_LIMIT_ENV: &str = "TRAINER_TIME_LIMIT_MS";
pub const LOOP_LIMIT_ENV: &str = "TRAINER_LOOP_LIMIT";
pub const RECURSION_LIMIT_ENV: &str = "TRAINER_RECURSION_LIMIT";
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const GEMINI_MODEL_ENV: &str = "GEMINI_MODEL";
pub const GEMINI_PROXY_URL_ENV: &str = "GEMINI_PROXY_URL";

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            time_ms: Some(MAX_EXECUTION_TIME_MS),
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl ExecutionLimits {
    /// Defaults overridden by `TRAINER_*` variables. A time limit of `0`
    /// disables the wall-clock budget.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let time_ms = match parsed::<u64>(&lookup, TIME_LIMIT_ENV) {
            Some(0) => None,
            Some(time_ms) => Some(time_ms),
            None => defaults.time_ms,
        };

        Self {
            time_ms,
            loop_iteration_limit: parsed(&lookup, LOOP_LIMIT_ENV)
                .unwrap_or(defaults.loop_iteration_limit),
            recursion_limit: parsed(&lookup, RECURSION_LIMIT_ENV)
                .unwrap_or(defaults.recursion_limit),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// When set, prompts go through this proxy endpoint instead of the
    /// Gemini REST API and no key is needed locally.
    pub proxy_url: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            proxy_url: None,
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: non_empty(GEMINI_API_KEY_ENV),
            model: non_empty(GEMINI_MODEL_ENV).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            proxy_url: non_empty(GEMINI_PROXY_URL_ENV),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_limits_default_when_unset() {
        assert_eq!(
            ExecutionLimits::from_lookup(lookup(&[])),
            ExecutionLimits::default()
        );
        assert_eq!(ExecutionLimits::default().time_ms, Some(MAX_EXECUTION_TIME_MS));
    }

    #[test]
    fn test_limits_overrides() {
        let limits = ExecutionLimits::from_lookup(lookup(&[
            (TIME_LIMIT_ENV, "250"),
            (LOOP_LIMIT_ENV, "1000"),
            (RECURSION_LIMIT_ENV, " 64 "),
        ]));
        assert_eq!(
            limits,
            ExecutionLimits {
                time_ms: Some(250),
                loop_iteration_limit: 1000,
                recursion_limit: 64,
            }
        );
    }

    #[test]
    fn test_zero_time_limit_disables_budget() {
        let limits = ExecutionLimits::from_lookup(lookup(&[(TIME_LIMIT_ENV, "0")]));
        assert_eq!(limits.time_ms, None);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let limits = ExecutionLimits::from_lookup(lookup(&[
            (TIME_LIMIT_ENV, "soon"),
            (LOOP_LIMIT_ENV, "-1"),
        ]));
        assert_eq!(limits, ExecutionLimits::default());
    }

    #[test]
    fn test_gemini_config() {
        assert_eq!(GeminiConfig::from_lookup(lookup(&[])), GeminiConfig::default());

        let config = GeminiConfig::from_lookup(lookup(&[
            (GEMINI_API_KEY_ENV, "secret"),
            (GEMINI_MODEL_ENV, ""),
            (GEMINI_PROXY_URL_ENV, "http://localhost:7071/api/gemini"),
        ]));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(
            config.proxy_url.as_deref(),
            Some("http://localhost:7071/api/gemini")
        );
    }
}
