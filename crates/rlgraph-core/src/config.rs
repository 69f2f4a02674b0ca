//! Configuration for components and builds

use serde::{Deserialize, Serialize};

/// Component-wide defaults for the flags of its computations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputationSettings {
    /// Flatten container inputs into per-key ops
    pub flatten_ops: bool,
    /// Call the method once per flat key
    pub split_ops: bool,
    /// Expose the current flat key to the method
    pub add_auto_key_as_first_param: bool,
    /// Re-assemble per-key outputs into container ops
    pub unflatten_ops: bool,
}

impl Default for ComputationSettings {
    fn default() -> Self {
        Self {
            flatten_ops: true,
            split_ops: false,
            add_auto_key_as_first_param: false,
            unflatten_ops: true,
        }
    }
}

/// Configuration for a component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentConfig {
    /// Naming token for backend variables; must match `^[\w\-]*$`
    pub scope: String,
    /// Name among siblings; defaults to the scope
    pub name: Option<String>,
    /// Device placement hint
    pub device: Option<String>,
    /// Part of the shared global model in distributed setups
    pub global_component: bool,
    /// Defaults for this component's computations
    pub computation_settings: ComputationSettings,
}

impl ComponentConfig {
    /// Create a config for the given scope
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    /// Set the name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the device
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Mark as global component
    #[must_use]
    pub fn global(mut self) -> Self {
        self.global_component = true;
        self
    }

    /// Set computation defaults
    #[must_use]
    pub fn with_computation_settings(mut self, settings: ComputationSettings) -> Self {
        self.computation_settings = settings;
        self
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Effective name
    #[must_use]
    pub fn resolved_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.scope)
    }
}

/// Configuration for [`crate::GraphBuilder`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Return a report instead of failing when components stay input-incomplete
    pub allow_incomplete: bool,
}
