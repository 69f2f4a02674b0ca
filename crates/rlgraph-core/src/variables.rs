//! Per-component variable registry

use indexmap::IndexMap;
use ndarray::ArrayD;
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{Initializer, Variable, VariableRequest, GLOBAL_VARIABLES};
use crate::graph::{ComponentGraph, ComponentId};
use crate::socket::SocketType;
use crate::spaces::{DType, Space};
use crate::{GraphError, Result};

/// Creates a component's variables once all of its in-socket spaces are known.
///
/// Receives the `in-socket name -> space` map of the component.
pub type VariableHook =
    Arc<dyn Fn(&mut ComponentGraph, ComponentId, &IndexMap<String, Space>) -> Result<()> + Send + Sync>;

/// A registered variable, possibly a container of backend variables
#[derive(Debug, Clone, PartialEq)]
pub enum VariableValue {
    /// One variable
    Single(Variable),
    /// Flattened container, keyed by variable name plus flat key
    Flat(IndexMap<String, Variable>),
    /// Nested by dict key
    Dict(IndexMap<String, VariableValue>),
    /// Nested by position
    Tuple(Vec<VariableValue>),
}

impl VariableValue {
    /// All backend variables, depth first
    pub fn leaves(&self) -> Vec<&Variable> {
        match self {
            Self::Single(v) => vec![v],
            Self::Flat(map) => map.values().collect(),
            Self::Dict(map) => map.values().flat_map(Self::leaves).collect(),
            Self::Tuple(items) => items.iter().flat_map(Self::leaves).collect(),
        }
    }

    /// The variable, unless this is a container
    pub fn as_single(&self) -> Option<&Variable> {
        match self {
            Self::Single(v) => Some(v),
            _ => None,
        }
    }
}

/// Leading batch dimension of space-derived variables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchRank {
    /// No batch dimension
    #[default]
    None,
    /// Size decided at runtime
    Dynamic,
    /// Fixed size
    Fixed(usize),
}

/// Where a space-derived variable takes its space from
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceSource {
    /// This space
    Space(Space),
    /// The resolved space of the named in-socket
    Socket(String),
}

/// Arguments of [`ComponentGraph::get_variable`].
///
/// A spec without shape, initializer and space only looks the variable up.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableSpec {
    /// Explicit shape; `None` marks a dynamic dimension
    pub shape: Option<Vec<Option<usize>>>,
    /// Element type for explicit shapes
    pub dtype: DType,
    /// Initial values
    pub initializer: Option<Initializer>,
    /// Join the trainable collection
    pub trainable: bool,
    /// Derive shape and dtype from a space
    pub from_space: Option<SpaceSource>,
    /// Leading batch dimension of space-derived variables
    pub batch_rank: BatchRank,
    /// Register a space-derived container as a flat `name+key` mapping
    pub flatten: bool,
}

impl Default for VariableSpec {
    fn default() -> Self {
        Self {
            shape: None,
            dtype: DType::Float,
            initializer: None,
            trainable: true,
            from_space: None,
            batch_rank: BatchRank::None,
            flatten: false,
        }
    }
}

impl VariableSpec {
    /// Lookup only
    pub fn getter() -> Self {
        Self::default()
    }

    /// A variable of fixed shape
    pub fn with_shape(shape: impl IntoIterator<Item = usize>) -> Self {
        Self {
            shape: Some(shape.into_iter().map(Some).collect()),
            ..Self::default()
        }
    }

    /// A variable shaped after `source`
    pub fn from_space(source: SpaceSource) -> Self {
        Self {
            from_space: Some(source),
            ..Self::default()
        }
    }

    /// Set the element type
    #[must_use]
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Set the initializer
    #[must_use]
    pub fn initializer(mut self, initializer: Initializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    /// Set the trainable flag
    #[must_use]
    pub fn trainable(mut self, trainable: bool) -> Self {
        self.trainable = trainable;
        self
    }

    /// Set the batch dimension
    #[must_use]
    pub fn batch_rank(mut self, batch_rank: BatchRank) -> Self {
        self.batch_rank = batch_rank;
        self
    }

    /// Set flattening
    #[must_use]
    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Whether this spec only looks a variable up
    pub fn is_getter(&self) -> bool {
        self.shape.is_none() && self.initializer.is_none() && self.from_space.is_none()
    }
}

impl ComponentGraph {
    /// Returns the variable `name` of `component`, creating it first unless
    /// `spec` is a pure getter.
    ///
    /// Created variables are named after the component's full scope. A
    /// second creation under the same registry name replaces the entry.
    pub fn get_variable(&mut self, component: ComponentId, name: &str, spec: VariableSpec) -> Result<VariableValue> {
        let owner = self.component(component)?;
        if spec.is_getter() {
            return owner
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| GraphError::VariableNotFound {
                    component: owner.name.clone(),
                    variable: name.to_string(),
                });
        }

        let scope = self.full_scope(component)?;
        let full_name = if scope.is_empty() {
            name.to_string()
        } else {
            format!("{scope}/{name}")
        };
        let backend = Arc::clone(&self.backend);

        let value = match &spec.from_space {
            Some(source) => {
                let space = self.resolve_space_source(component, source)?;
                let initializer = spec.initializer.as_ref();
                let leaves = space.flatten();
                let taken: HashSet<String> = backend.collection(GLOBAL_VARIABLES)?.into_iter().collect();
                if let Some(key) = leaves.keys().find(|key| taken.contains(&format!("{full_name}{key}"))) {
                    return Err(GraphError::NameConflict(format!("{full_name}{key}")));
                }
                if spec.flatten {
                    let mut flat = IndexMap::with_capacity(leaves.len());
                    for (key, sub) in leaves {
                        let leaf = sub.get_tensor_variable(
                            backend.as_ref(),
                            &format!("{full_name}{key}"),
                            spec.batch_rank,
                            spec.trainable,
                            initializer,
                        )?;
                        let VariableValue::Single(v) = leaf else {
                            return Err(GraphError::Backend(format!(
                                "flattened leaf '{full_name}{key}' did not yield a single variable"
                            )));
                        };
                        flat.insert(format!("{name}{key}"), v);
                    }
                    VariableValue::Flat(flat)
                } else {
                    space.get_tensor_variable(backend.as_ref(), &full_name, spec.batch_rank, spec.trainable, initializer)?
                }
            }
            None => {
                let initializer = spec.initializer.clone().unwrap_or_default();
                let shape = initializer.resolve_shape(spec.shape.as_deref())?;
                VariableValue::Single(backend.create_variable(VariableRequest {
                    name: full_name.clone(),
                    shape,
                    dtype: spec.dtype,
                    trainable: spec.trainable,
                    initializer,
                })?)
            }
        };

        let owner = self.comp_mut(component);
        if owner.variables.insert(name.to_string(), value.clone()).is_some() {
            tracing::warn!(component = %owner.name, variable = %name, "overwriting registered variable");
        } else {
            tracing::debug!(component = %owner.name, variable = %full_name, "created variable");
        }
        Ok(value)
    }

    /// Registered variables of `component`.
    ///
    /// With `names` empty all variables are returned, otherwise the named
    /// ones; unknown names are skipped. `collection` further restricts the
    /// result to variables in that backend collection.
    pub fn get_variables(
        &self,
        component: ComponentId,
        names: &[&str],
        collection: Option<&str>,
    ) -> Result<IndexMap<String, VariableValue>> {
        let owner = self.component(component)?;
        let in_collection: Option<HashSet<String>> = match collection {
            Some(c) => Some(self.backend.collection(c)?.into_iter().collect()),
            None => None,
        };
        let selected = owner.variables.iter().filter(|(name, value)| {
            let named = names.is_empty() || names.contains(&name.as_str());
            let collected = in_collection
                .as_ref()
                .map_or(true, |set| value.leaves().iter().any(|v| set.contains(&v.name)));
            named && collected
        });
        Ok(selected.map(|(n, v)| (n.clone(), v.clone())).collect())
    }

    /// Writes `updates` into rows `indices` of variable `name`
    pub fn scatter_update_variable(
        &self,
        component: ComponentId,
        name: &str,
        indices: &[usize],
        updates: &ArrayD<f32>,
    ) -> Result<()> {
        let variable = self.single_variable(component, name)?;
        self.backend.scatter_update(&variable, indices, updates)
    }

    /// Replaces the value of variable `name`
    pub fn assign_variable(&self, component: ComponentId, name: &str, value: &ArrayD<f32>) -> Result<()> {
        let variable = self.single_variable(component, name)?;
        self.backend.assign(&variable, value)
    }

    /// Reads variable `name`, optionally only rows `indices`
    pub fn read_variable(&self, component: ComponentId, name: &str, indices: Option<&[usize]>) -> Result<ArrayD<f32>> {
        let variable = self.single_variable(component, name)?;
        self.backend.read(&variable, indices)
    }

    fn single_variable(&self, component: ComponentId, name: &str) -> Result<Variable> {
        let owner = self.component(component)?;
        match owner.variables.get(name) {
            Some(VariableValue::Single(v)) => Ok(v.clone()),
            Some(_) => Err(GraphError::Configuration(format!(
                "variable '{name}' of '{}' is a container",
                owner.name
            ))),
            None => Err(GraphError::VariableNotFound {
                component: owner.name.clone(),
                variable: name.to_string(),
            }),
        }
    }

    fn resolve_space_source(&self, component: ComponentId, source: &SpaceSource) -> Result<Space> {
        match source {
            SpaceSource::Space(space) => Ok(space.clone()),
            SpaceSource::Socket(socket) => {
                let id = self.get_socket(component, socket.as_str(), Some(SocketType::In))?;
                self.sock(id).space.clone().ok_or_else(|| {
                    GraphError::Configuration(format!("space of in-socket '{socket}' is not resolved yet"))
                })
            }
        }
    }
}
