//! Noise sources for continuous action exploration

use ndarray::ArrayD;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rlgraph_core::prelude::*;

use crate::config::NoiseConfig;

/// Produces noise without any input: a single out-socket `noise`
#[derive(Debug, Clone)]
pub struct NoiseComponent {
    id: ComponentId,
    config: NoiseConfig,
}

impl NoiseComponent {
    /// Creates the component with the single out-socket `noise`.
    pub fn new(graph: &mut ComponentGraph, config: &NoiseConfig) -> Result<Self> {
        if let NoiseConfig::Gaussian { sd, .. } = config {
            if !(*sd >= 0.0) {
                return Err(GraphError::Configuration(format!(
                    "noise standard deviation must be non-negative, got {sd}"
                )));
            }
        }
        let id = graph.create_component(ComponentConfig::new("noise"))?;
        graph.define_outputs(id, ["noise"])?;
        graph.register_method(
            id,
            ComputationMethod::new("get_noise", 0, 1, |ctx, _| {
                Ok(vec![ctx.op("noise", &[], Space::float_box(Vec::new()))])
            }),
        )?;
        graph.add_computation(id, Vec::<&str>::new(), ["noise"], None, ComputationOptions::default())?;
        Ok(Self {
            id,
            config: config.clone(),
        })
    }

    /// Component id
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// One noise value
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64> {
        match self.config {
            NoiseConfig::Constant { value } => Ok(value),
            NoiseConfig::Gaussian { mean, sd } => {
                let normal = Normal::new(mean, sd).map_err(|e| GraphError::Configuration(e.to_string()))?;
                Ok(normal.sample(rng))
            }
        }
    }

    /// `actions` plus one noise value per element
    pub fn add_to<R: Rng + ?Sized>(&self, rng: &mut R, actions: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut noisy = actions.clone();
        for x in &mut noisy {
            *x += self.sample(rng)? as f32;
        }
        Ok(noisy)
    }
}
