//! Components built on the rlgraph-core assembly API
//!
//! This crate provides:
//! - Exploration (epsilon-greedy, additive noise, pass-through)
//! - Epsilon decay schedules
//! - A batch/time transposition preprocessor

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

/// Component configuration
pub mod config;
/// Epsilon-greedy decisions
pub mod epsilon;
/// Action exploration
pub mod exploration;
/// Action noise
pub mod noise;
/// Decay schedules
pub mod schedules;
/// Batch/time axis swapping
pub mod transpose;

// Re-export components
pub use epsilon::EpsilonExploration;
pub use exploration::{Exploration, ExplorationMode};
pub use noise::NoiseComponent;
pub use transpose::Transpose;

// Re-export configuration and schedules
pub use config::{EpsilonConfig, ExplorationConfig, NoiseConfig};
pub use schedules::{ConstantSchedule, DecaySchedule, ExponentialSchedule, LinearSchedule, Schedule};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DecaySchedule, Exploration, ExplorationConfig, NoiseConfig, Transpose};
    pub use rlgraph_core::prelude::*;
}
