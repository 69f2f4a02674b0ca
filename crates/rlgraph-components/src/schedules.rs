//! Decay schedules for exploration parameters

use serde::{Deserialize, Serialize};

/// Trait for schedules (e.g., for epsilon decay)
pub trait Schedule: Send + Sync + std::fmt::Debug {
    /// Get value at time step t
    fn value(&self, t: usize) -> f64;
}

/// Linear decay from `start` to `end` over `steps`, beginning at `start_step`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearSchedule {
    /// Value before `start_step`
    pub start: f64,
    /// Value after `start_step + steps`
    pub end: f64,
    /// First step of the decay
    pub start_step: usize,
    /// Length of the decay
    pub steps: usize,
}

impl LinearSchedule {
    /// Linear decay from `start` to `end`
    pub fn new(start: f64, end: f64, start_step: usize, steps: usize) -> Self {
        Self {
            start,
            end,
            start_step,
            steps,
        }
    }
}

impl Schedule for LinearSchedule {
    fn value(&self, t: usize) -> f64 {
        let t = t.saturating_sub(self.start_step);
        if t >= self.steps {
            self.end
        } else {
            let progress = t as f64 / self.steps as f64;
            self.start + (self.end - self.start) * progress
        }
    }
}

/// Exponential decay halving every `half_life` steps, bounded below by `min_value`
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialSchedule {
    /// Value at step 0
    pub start: f64,
    /// Lower bound
    pub min_value: f64,
    /// Steps until the value halves
    pub half_life: f64,
}

impl ExponentialSchedule {
    /// Exponential decay from `start`, floored at `min_value`
    pub fn new(start: f64, min_value: f64, half_life: f64) -> Self {
        Self {
            start,
            min_value,
            half_life,
        }
    }
}

impl Schedule for ExponentialSchedule {
    fn value(&self, t: usize) -> f64 {
        let value = self.start * 0.5f64.powf(t as f64 / self.half_life);
        value.max(self.min_value)
    }
}

/// Constant schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantSchedule {
    /// Returned at every step
    pub value: f64,
}

impl Schedule for ConstantSchedule {
    fn value(&self, _t: usize) -> f64 {
        self.value
    }
}

/// Serializable choice of schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecaySchedule {
    /// Always the same value
    Constant {
        /// The value
        value: f64,
    },
    /// See [`LinearSchedule`]
    Linear {
        /// Start value
        from: f64,
        /// End value
        to: f64,
        /// First step of the decay
        #[serde(default)]
        start_timestep: usize,
        /// Length of the decay
        num_timesteps: usize,
    },
    /// See [`ExponentialSchedule`]
    Exponential {
        /// Start value
        from: f64,
        /// Lower bound
        to: f64,
        /// Steps until the value halves
        half_life: f64,
    },
}

impl Default for DecaySchedule {
    fn default() -> Self {
        Self::Linear {
            from: 1.0,
            to: 0.1,
            start_timestep: 0,
            num_timesteps: 10_000,
        }
    }
}

impl DecaySchedule {
    /// Instantiate the described schedule
    pub fn build(&self) -> Box<dyn Schedule> {
        match *self {
            Self::Constant { value } => Box::new(ConstantSchedule { value }),
            Self::Linear {
                from,
                to,
                start_timestep,
                num_timesteps,
            } => Box::new(LinearSchedule::new(from, to, start_timestep, num_timesteps)),
            Self::Exponential { from, to, half_life } => Box::new(ExponentialSchedule::new(from, to, half_life)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_schedule() {
        let schedule = LinearSchedule::new(1.0, 0.0, 10, 100);
        assert_relative_eq!(schedule.value(0), 1.0);
        assert_relative_eq!(schedule.value(10), 1.0);
        assert_relative_eq!(schedule.value(60), 0.5);
        assert_relative_eq!(schedule.value(500), 0.0);
    }

    #[test]
    fn test_exponential_schedule() {
        let schedule = ExponentialSchedule::new(1.0, 0.1, 10.0);
        assert_relative_eq!(schedule.value(0), 1.0);
        assert_relative_eq!(schedule.value(10), 0.5);
        assert_relative_eq!(schedule.value(1000), 0.1);
    }

    #[test]
    fn test_decay_schedule_from_json() {
        let decay: DecaySchedule =
            serde_json::from_str(r#"{"type": "linear", "from": 1.0, "to": 0.2, "num_timesteps": 4}"#).unwrap();
        let schedule = decay.build();
        assert_relative_eq!(schedule.value(2), 0.6, epsilon = 1e-12);
        assert_relative_eq!(DecaySchedule::Constant { value: 0.3 }.build().value(7), 0.3);
    }
}
