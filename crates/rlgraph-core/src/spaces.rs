//! Space descriptors flowing through sockets
//!
//! A [`Space`] describes the shape, dtype and batch/time ranks of the data
//! a socket carries. Primitive spaces are boxes; container spaces nest other
//! spaces by key (`Dict`) or position (`Tuple`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{Backend, Initializer, VariableRequest};
use crate::variables::{BatchRank, VariableValue};
use crate::{GraphError, Result};

/// Element type of a primitive space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit float
    #[default]
    Float,
    /// 32-bit signed integer
    Int,
    /// Boolean
    Bool,
}

/// Primitive (box) space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    /// Element type
    #[serde(default)]
    pub dtype: DType,
    /// Shape without batch/time ranks
    #[serde(default)]
    pub shape: Vec<usize>,
    /// Number of categories (int boxes only)
    #[serde(default)]
    pub num_categories: Option<usize>,
    /// Lower bound
    #[serde(default)]
    pub low: Option<f64>,
    /// Upper bound
    #[serde(default)]
    pub high: Option<f64>,
    /// Whether a leading batch rank is present
    #[serde(default)]
    pub add_batch_rank: bool,
    /// Whether a time rank is present
    #[serde(default)]
    pub add_time_rank: bool,
    /// Time rank comes before the batch rank
    #[serde(default)]
    pub time_major: bool,
}

impl BoxSpace {
    fn new(dtype: DType, shape: Vec<usize>) -> Self {
        Self {
            dtype,
            shape,
            num_categories: None,
            low: None,
            high: None,
            add_batch_rank: false,
            add_time_rank: false,
            time_major: false,
        }
    }

    /// Full shape including batch/time ranks; `None` marks a dynamic rank.
    #[must_use]
    pub fn shape_with_ranks(&self) -> Vec<Option<usize>> {
        let mut dims = Vec::with_capacity(self.shape.len() + 2);
        match (self.add_batch_rank, self.add_time_rank) {
            (true, true) => dims.extend([None, None]),
            (true, false) | (false, true) => dims.push(None),
            (false, false) => {}
        }
        dims.extend(self.shape.iter().copied().map(Some));
        dims
    }

    /// Position of the batch rank in [`BoxSpace::shape_with_ranks`]
    #[must_use]
    pub fn batch_axis(&self) -> Option<usize> {
        match (self.add_batch_rank, self.add_time_rank, self.time_major) {
            (false, _, _) => None,
            (true, true, true) => Some(1),
            (true, _, _) => Some(0),
        }
    }
}

/// Shape/dtype metadata for data flowing through a socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Space {
    /// A primitive box
    #[serde(rename = "box")]
    Primitive(BoxSpace),
    /// Named sub-spaces
    Dict {
        /// Sub-spaces by key, in insertion order
        spaces: IndexMap<String, Space>,
    },
    /// Positional sub-spaces
    Tuple {
        /// Sub-spaces by position
        spaces: Vec<Space>,
    },
}

impl Space {
    /// Float box of the given shape
    #[must_use]
    pub fn float_box(shape: impl Into<Vec<usize>>) -> Self {
        Self::Primitive(BoxSpace::new(DType::Float, shape.into()))
    }

    /// Bounded float box
    #[must_use]
    pub fn bounded_float_box(shape: impl Into<Vec<usize>>, low: f64, high: f64) -> Self {
        let mut b = BoxSpace::new(DType::Float, shape.into());
        b.low = Some(low);
        b.high = Some(high);
        Self::Primitive(b)
    }

    /// Int box with `num_categories` categories per element
    #[must_use]
    pub fn int_box(num_categories: usize, shape: impl Into<Vec<usize>>) -> Self {
        let mut b = BoxSpace::new(DType::Int, shape.into());
        b.num_categories = Some(num_categories);
        b.low = Some(0.0);
        b.high = Some(num_categories as f64);
        Self::Primitive(b)
    }

    /// Bool box of the given shape
    #[must_use]
    pub fn bool_box(shape: impl Into<Vec<usize>>) -> Self {
        Self::Primitive(BoxSpace::new(DType::Bool, shape.into()))
    }

    /// Dict space from `(key, space)` pairs
    pub fn dict<K: Into<String>>(entries: impl IntoIterator<Item = (K, Space)>) -> Self {
        Self::Dict {
            spaces: entries.into_iter().map(|(k, s)| (k.into(), s)).collect(),
        }
    }

    /// Tuple space
    #[must_use]
    pub fn tuple(spaces: Vec<Space>) -> Self {
        Self::Tuple { spaces }
    }

    /// Adds a batch rank (recursively for containers)
    #[must_use]
    pub fn with_batch_rank(self) -> Self {
        self.map_primitives(&|mut b| {
            b.add_batch_rank = true;
            b
        })
    }

    /// Adds a time rank (recursively for containers)
    #[must_use]
    pub fn with_time_rank(self, time_major: bool) -> Self {
        self.map_primitives(&|mut b| {
            b.add_time_rank = true;
            b.time_major = time_major;
            b
        })
    }

    /// Sets `time_major` on every primitive
    #[must_use]
    pub fn with_time_major(self, time_major: bool) -> Self {
        self.map_primitives(&|mut b| {
            b.time_major = time_major;
            b
        })
    }

    /// Rebuilds the space with `f` applied to every primitive box.
    #[must_use]
    pub fn map_primitives(self, f: &dyn Fn(BoxSpace) -> BoxSpace) -> Self {
        match self {
            Self::Primitive(b) => Self::Primitive(f(b)),
            Self::Dict { spaces } => Self::Dict {
                spaces: spaces
                    .into_iter()
                    .map(|(k, s)| (k, s.map_primitives(f)))
                    .collect(),
            },
            Self::Tuple { spaces } => Self::Tuple {
                spaces: spaces.into_iter().map(|s| s.map_primitives(f)).collect(),
            },
        }
    }

    /// Builds a space from a JSON spec.
    ///
    /// Accepts the tagged serde form (`{"type": "box", ...}`, `{"type":
    /// "dict", "spaces": {...}}`) or one of the bare type names `"float"`,
    /// `"int"` and `"bool"`, which name a scalar box.
    pub fn from_spec(spec: &serde_json::Value) -> Result<Self> {
        if let serde_json::Value::String(name) = spec {
            return match name.as_str() {
                "float" => Ok(Self::float_box(Vec::new())),
                "int" => Ok(Self::Primitive(BoxSpace::new(DType::Int, Vec::new()))),
                "bool" => Ok(Self::bool_box(Vec::new())),
                other => Err(GraphError::Configuration(format!(
                    "Unknown space type name '{other}'"
                ))),
            };
        }
        Ok(serde_json::from_value(spec.clone())?)
    }

    /// Whether this is a `Dict` or `Tuple`
    #[must_use]
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::Primitive(_))
    }

    /// The primitive box, if any
    #[must_use]
    pub fn as_box(&self) -> Option<&BoxSpace> {
        match self {
            Self::Primitive(b) => Some(b),
            _ => None,
        }
    }

    /// Whether every primitive carries a batch rank
    #[must_use]
    pub fn has_batch_rank(&self) -> bool {
        self.flatten().values().all(|s| {
            s.as_box().is_some_and(|b| b.add_batch_rank)
        })
    }

    /// Ordered mapping from flat key to primitive space.
    ///
    /// A primitive maps from the empty key. Dict entries append `/key`,
    /// tuple entries append `/[i]`.
    #[must_use]
    pub fn flatten(&self) -> IndexMap<String, Space> {
        let mut out = IndexMap::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into(&self, prefix: String, out: &mut IndexMap<String, Space>) {
        match self {
            Self::Primitive(_) => {
                out.insert(prefix, self.clone());
            }
            Self::Dict { spaces } => {
                for (key, space) in spaces {
                    space.flatten_into(format!("{prefix}/{key}"), out);
                }
            }
            Self::Tuple { spaces } => {
                for (i, space) in spaces.iter().enumerate() {
                    space.flatten_into(format!("{prefix}/[{i}]"), out);
                }
            }
        }
    }

    /// Inverse of [`Space::flatten`].
    pub fn unflatten(flat: &IndexMap<String, Space>) -> Result<Self> {
        if let Some(space) = flat.get("") {
            if flat.len() != 1 {
                return Err(GraphError::Configuration(
                    "Flat key '' mixed with container keys".to_string(),
                ));
            }
            return Ok(space.clone());
        }

        let mut root = FlatNode::Branch(IndexMap::new());
        for (key, space) in flat {
            let segments: Vec<&str> = key.split('/').skip(1).collect();
            root.insert(&segments, space.clone(), key)?;
        }
        root.into_space()
    }

    /// Creates backend variable(s) shaped after this space.
    ///
    /// Containers yield a nested [`VariableValue`] whose leaves are named
    /// `name` plus the flat key of the leaf.
    pub fn get_tensor_variable(
        &self,
        backend: &dyn Backend,
        name: &str,
        batch_rank: BatchRank,
        trainable: bool,
        initializer: Option<&Initializer>,
    ) -> Result<VariableValue> {
        match self {
            Self::Primitive(b) => {
                let mut shape = Vec::with_capacity(b.shape.len() + 1);
                match batch_rank {
                    BatchRank::None => {}
                    BatchRank::Dynamic => shape.push(None),
                    BatchRank::Fixed(n) => shape.push(Some(n)),
                }
                shape.extend(b.shape.iter().copied().map(Some));
                let variable = backend.create_variable(VariableRequest {
                    name: name.to_string(),
                    shape,
                    dtype: b.dtype,
                    trainable,
                    initializer: initializer.cloned().unwrap_or_default(),
                })?;
                Ok(VariableValue::Single(variable))
            }
            Self::Dict { spaces } => {
                let mut out = IndexMap::with_capacity(spaces.len());
                for (key, space) in spaces {
                    let value = space.get_tensor_variable(
                        backend,
                        &format!("{name}/{key}"),
                        batch_rank,
                        trainable,
                        initializer,
                    )?;
                    out.insert(key.clone(), value);
                }
                Ok(VariableValue::Dict(out))
            }
            Self::Tuple { spaces } => spaces
                .iter()
                .enumerate()
                .map(|(i, space)| {
                    space.get_tensor_variable(
                        backend,
                        &format!("{name}/[{i}]"),
                        batch_rank,
                        trainable,
                        initializer,
                    )
                })
                .collect::<Result<Vec<_>>>()
                .map(VariableValue::Tuple),
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(b) => {
                let dims: Vec<String> = b
                    .shape_with_ranks()
                    .iter()
                    .map(|d| d.map_or_else(|| "?".to_string(), |n| n.to_string()))
                    .collect();
                write!(f, "{:?}({})", b.dtype, dims.join(","))
            }
            Self::Dict { spaces } => {
                let inner: Vec<String> = spaces.iter().map(|(k, s)| format!("{k}: {s}")).collect();
                write!(f, "Dict({})", inner.join(", "))
            }
            Self::Tuple { spaces } => {
                let inner: Vec<String> = spaces.iter().map(ToString::to_string).collect();
                write!(f, "Tuple({})", inner.join(", "))
            }
        }
    }
}

enum FlatNode {
    Leaf(Space),
    Branch(IndexMap<String, FlatNode>),
}

impl FlatNode {
    fn insert(&mut self, segments: &[&str], space: Space, key: &str) -> Result<()> {
        let Self::Branch(children) = self else {
            return Err(GraphError::Configuration(format!(
                "Flat key '{key}' descends into a primitive"
            )));
        };
        match segments {
            [] => Err(GraphError::Configuration(format!("Empty flat key segment in '{key}'"))),
            [last] => {
                if children.insert((*last).to_string(), Self::Leaf(space)).is_some() {
                    return Err(GraphError::Configuration(format!("Duplicate flat key '{key}'")));
                }
                Ok(())
            }
            [head, rest @ ..] => children
                .entry((*head).to_string())
                .or_insert_with(|| Self::Branch(IndexMap::new()))
                .insert(rest, space, key),
        }
    }

    fn into_space(self) -> Result<Space> {
        match self {
            Self::Leaf(space) => Ok(space),
            Self::Branch(children) => {
                let indices: Option<Vec<usize>> = children
                    .keys()
                    .map(|k| k.strip_prefix('[')?.strip_suffix(']')?.parse().ok())
                    .collect();
                match indices {
                    Some(indices) if !indices.is_empty() => {
                        let mut slots: Vec<Option<Space>> = vec![None; indices.len()];
                        for (i, child) in indices.into_iter().zip(children.into_values()) {
                            let slot = slots.get_mut(i).ok_or_else(|| {
                                GraphError::Configuration(format!("Tuple index {i} out of range"))
                            })?;
                            *slot = Some(child.into_space()?);
                        }
                        let spaces = slots
                            .into_iter()
                            .collect::<Option<Vec<_>>>()
                            .ok_or_else(|| {
                                GraphError::Configuration("Gap in tuple indices".to_string())
                            })?;
                        Ok(Space::Tuple { spaces })
                    }
                    _ => {
                        let mut spaces = IndexMap::with_capacity(children.len());
                        for (k, child) in children {
                            spaces.insert(k, child.into_space()?);
                        }
                        Ok(Space::Dict { spaces })
                    }
                }
            }
        }
    }
}
