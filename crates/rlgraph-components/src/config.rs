//! Configuration for exploration components

use serde::{Deserialize, Serialize};

use crate::schedules::DecaySchedule;

/// Epsilon-greedy exploration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpsilonConfig {
    /// Schedule of the exploration probability over time steps
    pub decay: DecaySchedule,
}

/// Noise added to continuous actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoiseConfig {
    /// The same value every step
    Constant {
        /// Added value
        value: f64,
    },
    /// Independent normal samples
    Gaussian {
        /// Mean
        mean: f64,
        /// Standard deviation
        sd: f64,
    },
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self::Gaussian { mean: 0.0, sd: 1.0 }
    }
}

/// Configuration for [`crate::Exploration`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Scope of the exploration component
    pub scope: Option<String>,
    /// Selects epsilon-greedy mode; takes precedence over `noise`
    pub epsilon: Option<EpsilonConfig>,
    /// Selects additive noise mode
    pub noise: Option<NoiseConfig>,
}

impl ExplorationConfig {
    /// Epsilon-greedy exploration with the given decay
    pub fn epsilon(decay: DecaySchedule) -> Self {
        Self {
            epsilon: Some(EpsilonConfig { decay }),
            ..Self::default()
        }
    }

    /// Additive noise exploration
    pub fn noise(noise: NoiseConfig) -> Self {
        Self {
            noise: Some(noise),
            ..Self::default()
        }
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> rlgraph_core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
