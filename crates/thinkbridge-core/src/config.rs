//! Transformer configuration
//!
//! Immutable per-transformer settings. The excluded profile layer decodes its own
//! file formats; this module only owns the TOML shape it hands over and the
//! validation performed at that boundary.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::debug::DEBUG_ENV_VAR;
use crate::paths;

/// Configuration errors, raised where a value is first interpreted
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unrecognized reasoning effort
    #[error("invalid reasoning effort '{0}' (expected low, medium, high or max)")]
    InvalidEffort(String),

    /// Debug logging requested without a usable directory
    #[error("debug log directory must not be empty")]
    EmptyDebugLogDir,

    /// Custom prompt text is blank
    #[error("custom prompt for effort '{0}' is empty")]
    EmptyCustomPrompt(Effort),

    /// TOML decode failure
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Reasoning effort tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    #[default]
    Medium,
    High,
    Max,
}

impl Effort {
    /// All tiers, lowest first
    pub const ALL: [Effort; 4] = [Effort::Low, Effort::Medium, Effort::High, Effort::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
            Effort::Max => "max",
        }
    }

    /// Value sent as `reasoning_effort` upstream
    ///
    /// OpenAI-compatible providers stop at `high`.
    pub fn upstream_value(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High | Effort::Max => "high",
        }
    }

    /// Map an Anthropic `budget_tokens` value onto a tier
    pub fn from_budget_tokens(budget: u32) -> Self {
        match budget {
            0..=4095 => Effort::Low,
            4096..=16383 => Effort::Medium,
            16384..=32767 => Effort::High,
            _ => Effort::Max,
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effort {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Effort::Low),
            "medium" => Ok(Effort::Medium),
            "high" => Ok(Effort::High),
            "max" => Ok(Effort::Max),
            _ => Err(ConfigError::InvalidEffort(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Effort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Configuration for a [`Transformer`](crate::ai::transform::Transformer)
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    /// Log per-delta detail
    pub verbose: bool,
    /// Persist the four per-request diagnostic artifacts
    pub debug_log: bool,
    /// Where diagnostic artifacts go
    pub debug_log_dir: PathBuf,
    /// Inject the reasoning prompt even when the request did not ask for thinking
    pub reasoning_enabled: bool,
    /// Thinking switch for requests that select none
    pub default_thinking: bool,
    /// Prepend the English-response directive
    pub force_locale: bool,
    /// Effort used when nothing else selects one
    pub default_effort: Effort,
    /// Per-effort replacements for the built-in reasoning prompts
    pub custom_prompts: Option<HashMap<Effort, String>>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            debug_log: false,
            debug_log_dir: paths::logs_dir(),
            reasoning_enabled: false,
            default_thinking: true,
            force_locale: true,
            default_effort: Effort::Medium,
            custom_prompts: None,
        }
    }
}

/// On-disk shape, before validation
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTransformerConfig {
    verbose: Option<bool>,
    debug_log: Option<bool>,
    debug_log_dir: Option<PathBuf>,
    reasoning_enabled: Option<bool>,
    default_thinking: Option<bool>,
    force_locale: Option<bool>,
    default_effort: Option<String>,
    custom_prompts: Option<HashMap<String, String>>,
}

impl TransformerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawTransformerConfig = toml::from_str(input)?;
        let defaults = Self::default();

        let default_effort = match raw.default_effort {
            Some(value) => value.parse()?,
            None => defaults.default_effort,
        };

        let custom_prompts = match raw.custom_prompts {
            Some(map) => {
                let mut prompts = HashMap::with_capacity(map.len());
                for (key, text) in map {
                    prompts.insert(key.parse::<Effort>()?, text);
                }
                Some(prompts)
            }
            None => None,
        };

        let config = Self {
            verbose: raw.verbose.unwrap_or(defaults.verbose),
            debug_log: raw.debug_log.unwrap_or(defaults.debug_log),
            debug_log_dir: raw.debug_log_dir.unwrap_or(defaults.debug_log_dir),
            reasoning_enabled: raw.reasoning_enabled.unwrap_or(defaults.reasoning_enabled),
            default_thinking: raw.default_thinking.unwrap_or(defaults.default_thinking),
            force_locale: raw.force_locale.unwrap_or(defaults.force_locale),
            default_effort,
            custom_prompts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-request
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debug_log_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDebugLogDir);
        }
        if let Some(prompts) = &self.custom_prompts {
            for effort in Effort::ALL {
                if prompts.get(&effort).is_some_and(|p| p.trim().is_empty()) {
                    return Err(ConfigError::EmptyCustomPrompt(effort));
                }
            }
        }
        Ok(())
    }
}

/// Whether the debug environment toggle is set to a truthy value
pub fn debug_env_enabled() -> bool {
    std::env::var(DEBUG_ENV_VAR)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
