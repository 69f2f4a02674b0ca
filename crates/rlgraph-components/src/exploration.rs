//! Exploration on top of a policy's action output
//!
//! Depending on its configuration an [`Exploration`] replaces sampled
//! actions by random ones (epsilon-greedy, discrete actions), adds noise
//! (continuous actions) or passes actions through unchanged.

use indexmap::IndexMap;
use ndarray::ArrayD;
use rand::Rng;
use rlgraph_core::prelude::*;
use std::sync::Arc;

use crate::config::ExplorationConfig;
use crate::epsilon::EpsilonExploration;
use crate::noise::NoiseComponent;

/// Active exploration strategy
#[derive(Debug)]
pub enum ExplorationMode {
    /// Random actions with decaying probability
    Epsilon(EpsilonExploration),
    /// Noise added to continuous actions
    Noise(NoiseComponent),
    /// Actions unchanged
    PassThrough,
}

/// In-socket `actions`, out-socket `action`.
///
/// Epsilon-greedy and noise modes add an in-socket `use_exploration`, a
/// scalar bool switching exploration off when false. Epsilon-greedy also
/// takes `time_step`.
#[derive(Debug)]
pub struct Exploration {
    id: ComponentId,
    mode: ExplorationMode,
    action_space: Space,
}

impl Exploration {
    /// Creates the component and its exploration sub-component.
    ///
    /// Fails when both epsilon and noise are configured, or when
    /// `action_space` does not suit the strategy (epsilon-greedy needs an
    /// int box with categories, noise a float box).
    pub fn new(graph: &mut ComponentGraph, config: &ExplorationConfig, action_space: Space) -> Result<Self> {
        if config.epsilon.is_some() && config.noise.is_some() {
            return Err(GraphError::Configuration(
                "Cannot use both epsilon exploration and a noise component at the same time".to_string(),
            ));
        }
        check_action_space(config, &action_space)?;

        let scope = config.scope.as_deref().unwrap_or("exploration");
        let id = graph.create_component(ComponentConfig::new(scope))?;
        graph.define_inputs(id, ["actions"], None)?;
        graph.define_outputs(id, ["action"])?;
        graph.set_variable_hook(id, Arc::new(check_input_spaces))?;

        let mode = if let Some(epsilon) = &config.epsilon {
            let eps = EpsilonExploration::new(graph, epsilon)?;
            graph.add_component(id, eps.id(), ConnectSpec::None)?;
            graph.define_inputs(id, ["time_step", "use_exploration"], None)?;
            graph.connect(id, "actions", (eps.id(), "actions"))?;
            graph.connect(id, "time_step", (eps.id(), "time_step"))?;
            graph.ensure_internal_socket(id, "epsilon_decisions")?;
            graph.connect(id, (eps.id(), "do_explore"), "epsilon_decisions")?;

            graph.register_method(
                id,
                ComputationMethod::new("pick", 3, 1, |ctx, inputs| {
                    let (switch, decisions, sample) = (&inputs[0], &inputs[1], &inputs[2]);
                    Ok(vec![ctx.op("pick", &[switch, decisions, sample], sample.space().clone())])
                }),
            )?;
            graph.add_computation(
                id,
                ["use_exploration", "epsilon_decisions", "actions"],
                ["action"],
                Some("pick"),
                ComputationOptions::default().flatten_ops(false),
            )?;
            ExplorationMode::Epsilon(eps)
        } else if let Some(noise) = &config.noise {
            let noise = NoiseComponent::new(graph, noise)?;
            graph.add_component(id, noise.id(), ConnectSpec::None)?;
            graph.define_inputs(id, ["use_exploration"], None)?;
            graph.ensure_internal_socket(id, "noise")?;
            graph.connect(id, (noise.id(), "noise"), "noise")?;

            graph.register_method(
                id,
                ComputationMethod::new("add_noise", 3, 1, |ctx, inputs| {
                    let (switch, noise, sample) = (&inputs[0], &inputs[1], &inputs[2]);
                    Ok(vec![ctx.op("add_noise", &[switch, noise, sample], sample.space().clone())])
                }),
            )?;
            graph.add_computation(
                id,
                ["use_exploration", "noise", "actions"],
                ["action"],
                Some("add_noise"),
                ComputationOptions::default(),
            )?;
            ExplorationMode::Noise(noise)
        } else {
            graph.register_method(
                id,
                ComputationMethod::new("pass_through", 1, 1, |_, inputs| Ok(inputs.to_vec())),
            )?;
            graph.add_computation(id, ["actions"], ["action"], None, ComputationOptions::default())?;
            ExplorationMode::PassThrough
        };
        tracing::debug!(component = %scope, mode = ?mode_name(&mode), "created exploration");

        Ok(Self {
            id,
            mode,
            action_space,
        })
    }

    /// Component id
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Strategy chosen from the config
    pub fn mode(&self) -> &ExplorationMode {
        &self.mode
    }

    /// Space of a single action
    pub fn action_space(&self) -> &Space {
        &self.action_space
    }

    /// Replaces `samples` by uniformly random actions wherever the epsilon
    /// schedule says to explore at time step `t`.
    ///
    /// With `use_exploration` off, or outside epsilon mode, `samples` come
    /// back unchanged.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R, t: usize, samples: &[i64], use_exploration: bool) -> Vec<i64> {
        let ExplorationMode::Epsilon(eps) = &self.mode else {
            return samples.to_vec();
        };
        if !use_exploration {
            return samples.to_vec();
        }
        let categories = self
            .action_space
            .as_box()
            .and_then(|b| b.num_categories)
            .unwrap_or(1) as i64;
        eps.decide(rng, t, samples.len())
            .into_iter()
            .zip(samples)
            .map(|(explore, &sample)| if explore { rng.gen_range(0..categories) } else { sample })
            .collect()
    }

    /// `actions` plus noise in noise mode with `use_exploration` on,
    /// otherwise `actions` unchanged
    pub fn add_noise<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        actions: &ArrayD<f32>,
        use_exploration: bool,
    ) -> Result<ArrayD<f32>> {
        match &self.mode {
            ExplorationMode::Noise(noise) if use_exploration => noise.add_to(rng, actions),
            _ => Ok(actions.clone()),
        }
    }
}

fn mode_name(mode: &ExplorationMode) -> &'static str {
    match mode {
        ExplorationMode::Epsilon(_) => "epsilon",
        ExplorationMode::Noise(_) => "noise",
        ExplorationMode::PassThrough => "pass-through",
    }
}

fn check_action_space(config: &ExplorationConfig, action_space: &Space) -> Result<()> {
    let b = action_space.as_box();
    if config.epsilon.is_some() {
        let ok = b.is_some_and(|b| b.dtype == rlgraph_core::DType::Int && b.num_categories.is_some_and(|n| n >= 1));
        if !ok {
            return Err(GraphError::Configuration(format!(
                "epsilon exploration needs an int action space with categories, got {action_space}"
            )));
        }
    } else if config.noise.is_some() && !b.is_some_and(|b| b.dtype == rlgraph_core::DType::Float) {
        return Err(GraphError::Configuration(format!(
            "noise exploration needs a float action space, got {action_space}"
        )));
    }
    Ok(())
}

fn check_input_spaces(_: &mut ComponentGraph, _: ComponentId, spaces: &IndexMap<String, Space>) -> Result<()> {
    if let Some(switch) = spaces.get("use_exploration") {
        if !switch.as_box().is_some_and(|b| b.dtype == rlgraph_core::DType::Bool) {
            return Err(GraphError::Configuration(format!(
                "use_exploration space {switch} must be a bool box"
            )));
        }
    }
    match spaces.get("actions") {
        Some(actions) if actions.has_batch_rank() => Ok(()),
        Some(actions) => Err(GraphError::Configuration(format!(
            "actions space {actions} must have a batch rank"
        ))),
        None => Ok(()),
    }
}
