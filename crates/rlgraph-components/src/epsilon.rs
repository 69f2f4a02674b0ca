//! Epsilon-greedy exploration decisions

use rand::Rng;
use rlgraph_core::prelude::*;

use crate::config::EpsilonConfig;
use crate::schedules::Schedule;

/// Decides per batch item whether to explore, with probability given by a
/// decay schedule over time steps.
///
/// In-sockets `actions` and `time_step`, out-socket `do_explore`.
#[derive(Debug)]
pub struct EpsilonExploration {
    id: ComponentId,
    schedule: Box<dyn Schedule>,
}

impl EpsilonExploration {
    /// Creates the component with in-sockets `actions` and `time_step` and out-socket `do_explore`.
    pub fn new(graph: &mut ComponentGraph, config: &EpsilonConfig) -> Result<Self> {
        let id = graph.create_component(ComponentConfig::new("epsilon-exploration"))?;
        graph.define_inputs(id, ["actions", "time_step"], None)?;
        graph.define_outputs(id, ["do_explore"])?;
        graph.register_method(
            id,
            ComputationMethod::new("do_explore", 2, 1, |ctx, inputs| {
                let decisions = Space::bool_box(Vec::new()).with_batch_rank();
                Ok(vec![ctx.op("epsilon_decisions", &[&inputs[0], &inputs[1]], decisions)])
            }),
        )?;
        graph.add_computation(
            id,
            ["actions", "time_step"],
            ["do_explore"],
            None,
            ComputationOptions::default().flatten_ops(false),
        )?;
        Ok(Self {
            id,
            schedule: config.decay.build(),
        })
    }

    /// Component id
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Exploration probability at time step `t`
    pub fn epsilon(&self, t: usize) -> f64 {
        self.schedule.value(t)
    }

    /// Draws one explore/exploit decision per batch item
    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R, t: usize, batch_size: usize) -> Vec<bool> {
        let epsilon = self.epsilon(t);
        (0..batch_size).map(|_| rng.gen::<f64>() < epsilon).collect()
    }
}
