//! Agent settings loaded from JSON or environment variables.
//!
//! Every field is optional; absent values leave the builder's configuration
//! untouched when applied.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::env::EnvConfigProvider;
use super::{ConfigError, ConfigResult};
use crate::retry::{OnFailure, RetryPolicy};

const RECURSION_LIMIT: &str = "recursion_limit";
const SYSTEM_PROMPT: &str = "system_prompt";
const PARALLEL_TOOL_CALLS: &str = "parallel_tool_calls";
const MODEL_MAX_RETRIES: &str = "model.max_retries";
const MODEL_INITIAL_DELAY_MS: &str = "model.initial_delay_ms";
const MODEL_BACKOFF_FACTOR: &str = "model.backoff_factor";
const MODEL_MAX_DELAY_MS: &str = "model.max_delay_ms";
const MODEL_JITTER: &str = "model.jitter";
const MODEL_ON_FAILURE: &str = "model.on_failure";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recursion_limit: Option<usize>,
    pub system_prompt: Option<String>,
    pub parallel_tool_calls: Option<bool>,
    /// Agent-level retry around every raw model call.
    pub model_retry: Option<RetrySettings>,
}

/// Failure handling that can be expressed in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    Raise,
    ReturnMessage,
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raise" => Ok(FailureMode::Raise),
            "return_message" => Ok(FailureMode::ReturnMessage),
            other => Err(format!(
                "expected 'raise' or 'return_message', got '{other}'"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub jitter: Option<bool>,
    pub on_failure: Option<FailureMode>,
}

impl RetrySettings {
    fn is_empty(&self) -> bool {
        self == &RetrySettings::default()
    }

    /// Overlay these settings on [`RetryPolicy::default`].
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(n) = self.max_retries {
            policy.max_retries = n;
        }
        if let Some(ms) = self.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = self.backoff_factor {
            policy.backoff_factor = factor;
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(jitter) = self.jitter {
            policy.jitter = jitter;
        }
        match self.on_failure {
            Some(FailureMode::Raise) => policy.on_failure = OnFailure::Raise,
            Some(FailureMode::ReturnMessage) => policy.on_failure = OnFailure::ReturnMessage,
            None => {}
        }
        policy
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(factor) = self.backoff_factor
            && (!factor.is_finite() || factor < 0.0)
        {
            return Err(ConfigError::invalid(
                MODEL_BACKOFF_FACTOR,
                format!("must be a non-negative number, got {factor}"),
            ));
        }
        let policy = self.to_policy();
        if policy.initial_delay > policy.max_delay {
            return Err(ConfigError::invalid(
                MODEL_INITIAL_DELAY_MS,
                format!(
                    "{}ms exceeds max delay of {}ms",
                    policy.initial_delay.as_millis(),
                    policy.max_delay.as_millis()
                ),
            ));
        }
        Ok(())
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from environment variables named `<prefix><KEY>`, e.g.
    /// `AGENT_RECURSION_LIMIT` or `AGENT_MODEL_MAX_RETRIES` for prefix `AGENT_`.
    pub fn from_env(prefix: &str) -> ConfigResult<Self> {
        let provider = EnvConfigProvider::prefixed(prefix);
        Self::from_lookup(|key| provider.get_raw(key))
    }

    /// Read settings through `lookup`, which receives dotted keys such as
    /// `model.max_retries`.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> ConfigResult<Option<String>>,
    {
        let retry = RetrySettings {
            max_retries: parse(&lookup, MODEL_MAX_RETRIES)?,
            initial_delay_ms: parse(&lookup, MODEL_INITIAL_DELAY_MS)?,
            backoff_factor: parse(&lookup, MODEL_BACKOFF_FACTOR)?,
            max_delay_ms: parse(&lookup, MODEL_MAX_DELAY_MS)?,
            jitter: parse_flag(&lookup, MODEL_JITTER)?,
            on_failure: parse(&lookup, MODEL_ON_FAILURE)?,
        };
        let settings = Settings {
            recursion_limit: parse(&lookup, RECURSION_LIMIT)?,
            system_prompt: lookup(SYSTEM_PROMPT)?.filter(|s| !s.is_empty()),
            parallel_tool_calls: parse_flag(&lookup, PARALLEL_TOOL_CALLS)?,
            model_retry: (!retry.is_empty()).then_some(retry),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.recursion_limit == Some(0) {
            return Err(ConfigError::invalid(RECURSION_LIMIT, "must be at least 1"));
        }
        if let Some(retry) = &self.model_retry {
            retry.validate()?;
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> ConfigResult<Option<String>>,
{
    match lookup(key)? {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, format!("'{raw}': {e}"))),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> ConfigResult<Option<bool>>
where
    F: Fn(&str) -> ConfigResult<Option<String>>,
{
    let Some(raw) = lookup(key)? else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(
            key,
            format!("'{raw}' is not a boolean"),
        )),
    }
}
