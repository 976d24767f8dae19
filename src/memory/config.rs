//! Memory controller configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{GateError, GateResult};

/// Model settings for one compression stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier passed to the summarizer (`None` = summarizer's default)
    #[serde(default)]
    pub model: Option<String>,

    /// Maximum output tokens for the compression call
    pub max_output_tokens: u32,
}

impl ModelConfig {
    /// Create a model config with an explicit model
    pub fn new(model: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            model: Some(model.into()),
            max_output_tokens,
        }
    }

    fn observer_default() -> Self {
        Self {
            model: None,
            max_output_tokens: 4096,
        }
    }

    fn reflector_default() -> Self {
        Self {
            model: None,
            max_output_tokens: 8192,
        }
    }
}

/// Configuration for [`MemoryController`](super::MemoryController)
///
/// ```ignore
/// let config = MemoryConfig::new()
///     .with_observation_threshold(20_000)
///     .with_reflection_threshold(50_000)
///     .with_activation_percent(80)
///     .with_buffer_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Unobserved message tokens that trigger an observation
    #[serde(default = "default_observation_threshold")]
    pub observation_threshold: u64,

    /// Observation tokens that trigger a reflection
    #[serde(default = "default_reflection_threshold")]
    pub reflection_threshold: u64,

    /// Percentage of a threshold at which buffering starts (floor, 1-100)
    #[serde(default = "default_activation_percent")]
    pub activation_percent: u32,

    /// Upper bound on a single background compression call
    #[serde(default = "default_buffer_timeout_ms")]
    pub buffer_timeout_ms: u64,

    /// Model used for observations
    #[serde(default = "ModelConfig::observer_default")]
    pub observer_model: ModelConfig,

    /// Model used for reflections
    #[serde(default = "ModelConfig::reflector_default")]
    pub reflector_model: ModelConfig,
}

fn default_observation_threshold() -> u64 {
    30_000
}

fn default_reflection_threshold() -> u64 {
    40_000
}

fn default_activation_percent() -> u32 {
    100
}

fn default_buffer_timeout_ms() -> u64 {
    120_000
}

impl MemoryConfig {
    /// Create a configuration with default thresholds
    pub fn new() -> Self {
        Self {
            observation_threshold: default_observation_threshold(),
            reflection_threshold: default_reflection_threshold(),
            activation_percent: default_activation_percent(),
            buffer_timeout_ms: default_buffer_timeout_ms(),
            observer_model: ModelConfig::observer_default(),
            reflector_model: ModelConfig::reflector_default(),
        }
    }

    /// Set the observation threshold
    pub fn with_observation_threshold(mut self, tokens: u64) -> Self {
        self.observation_threshold = tokens;
        self
    }

    /// Set the reflection threshold
    pub fn with_reflection_threshold(mut self, tokens: u64) -> Self {
        self.reflection_threshold = tokens;
        self
    }

    /// Start buffering once a counter reaches this percentage of its threshold
    pub fn with_activation_percent(mut self, percent: u32) -> Self {
        self.activation_percent = percent;
        self
    }

    /// Set the timeout for background compression calls
    pub fn with_buffer_timeout(mut self, timeout: Duration) -> Self {
        self.buffer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the observer model
    pub fn with_observer_model(mut self, model: ModelConfig) -> Self {
        self.observer_model = model;
        self
    }

    /// Set the reflector model
    pub fn with_reflector_model(mut self, model: ModelConfig) -> Self {
        self.reflector_model = model;
        self
    }

    /// Buffer timeout as Duration
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }

    /// Reject configurations that would never or always trigger
    pub fn validate(&self) -> GateResult<()> {
        if self.observation_threshold == 0 {
            return Err(GateError::invalid_config("observation_threshold must be > 0"));
        }
        if self.reflection_threshold == 0 {
            return Err(GateError::invalid_config("reflection_threshold must be > 0"));
        }
        if !(1..=100).contains(&self.activation_percent) {
            return Err(GateError::invalid_config(format!(
                "activation_percent must be within 1..=100, got {}",
                self.activation_percent
            )));
        }
        if self.buffer_timeout_ms == 0 {
            return Err(GateError::invalid_config("buffer_timeout_ms must be > 0"));
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
