//! Backend capability passed into a component graph
//!
//! A graph never consults a process-wide backend switch. It holds an
//! `Arc<dyn Backend>` given at construction, so several backends can live
//! side by side (in tests in particular). Every trait method has a default
//! body that reports [`GraphError::Unimplemented`] for the backend's kind;
//! backends override what they support.

use indexmap::IndexMap;
use ndarray::{ArrayD, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::spaces::DType;
use crate::{GraphError, Result};

/// Collection holding every trainable variable
pub const TRAINABLE_VARIABLES: &str = "trainable_variables";
/// Collection holding every variable
pub const GLOBAL_VARIABLES: &str = "global_variables";

/// The fixed set of backend identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process ndarray storage
    NdArray,
    /// TensorFlow graph backend
    TensorFlow,
    /// PyTorch define-by-run backend
    PyTorch,
}

/// Initial values for a new variable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Xavier/Glorot uniform
    #[default]
    Default,
    /// Normal with stddev `1/sqrt(shape[0])`, resampled beyond two stddevs
    TruncatedNormal,
    /// The same value everywhere
    Constant(f64),
    /// Fixed values; the variable takes the array's shape
    Values(ArrayD<f32>),
}

impl Initializer {
    /// Reconciles a requested shape with the initializer.
    ///
    /// `Values` brings its own shape. A requested shape that disagrees with it
    /// is a configuration error.
    pub fn resolve_shape(&self, requested: Option<&[Option<usize>]>) -> Result<Vec<Option<usize>>> {
        match (self, requested) {
            (Self::Values(array), None) => Ok(array.shape().iter().copied().map(Some).collect()),
            (Self::Values(array), Some(shape)) => {
                let matches = shape.len() == array.ndim()
                    && shape
                        .iter()
                        .zip(array.shape())
                        .all(|(want, have)| want.map_or(true, |w| w == *have));
                if matches {
                    Ok(array.shape().iter().copied().map(Some).collect())
                } else {
                    Err(GraphError::Configuration(format!(
                        "Shape of given items ({:?}) not identical with shape ({shape:?})",
                        array.shape()
                    )))
                }
            }
            (_, Some(shape)) => Ok(shape.to_vec()),
            (_, None) => Ok(Vec::new()),
        }
    }

    fn materialize(&self, dims: &[usize], rng: &mut StdRng) -> Result<ArrayD<f32>> {
        match self {
            Self::Default => {
                let fan_in = dims.first().copied().unwrap_or(1).max(1);
                let fan_out = dims.last().copied().unwrap_or(1).max(1);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                Ok(ArrayD::from_shape_fn(IxDyn(dims), |_| rng.gen_range(-limit..limit)))
            }
            Self::TruncatedNormal => {
                let stddev = 1.0 / (dims.first().copied().unwrap_or(1).max(1) as f32).sqrt();
                let normal = Normal::new(0.0, stddev)
                    .map_err(|e| GraphError::Backend(e.to_string()))?;
                Ok(ArrayD::from_shape_fn(IxDyn(dims), |_| loop {
                    let x: f32 = normal.sample(rng);
                    if x.abs() <= 2.0 * stddev {
                        break x;
                    }
                }))
            }
            Self::Constant(value) => Ok(ArrayD::from_elem(IxDyn(dims), *value as f32)),
            Self::Values(array) => {
                if array.shape() == dims {
                    Ok(array.clone())
                } else {
                    Err(GraphError::Configuration(format!(
                        "Shape of given items ({:?}) not identical with shape ({dims:?})",
                        array.shape()
                    )))
                }
            }
        }
    }
}

/// Everything a backend needs to allocate one variable
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRequest {
    /// Fully-qualified name
    pub name: String,
    /// Shape; `None` marks a dynamic (batch) dimension
    pub shape: Vec<Option<usize>>,
    /// Element type
    pub dtype: DType,
    /// Whether the variable joins the trainable collection
    pub trainable: bool,
    /// Initial values
    pub initializer: Initializer,
}

/// Handle to a backend variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    /// Allocation id, unique per backend
    pub id: usize,
    /// Fully-qualified name
    pub name: String,
    /// Declared shape
    pub shape: Vec<Option<usize>>,
    /// Element type
    pub dtype: DType,
    /// Trainable flag
    pub trainable: bool,
}

/// Stateful storage and primitive variable operations
pub trait Backend: Send + Sync + fmt::Debug {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Allocates a variable; duplicate fully-qualified names are refused
    fn create_variable(&self, request: VariableRequest) -> Result<Variable> {
        let _ = request;
        Err(unimplemented(self.kind(), "create_variable"))
    }

    /// Overwrites rows `indices` (axis 0) with the rows of `updates`
    fn scatter_update(&self, variable: &Variable, indices: &[usize], updates: &ArrayD<f32>) -> Result<()> {
        let _ = (variable, indices, updates);
        Err(unimplemented(self.kind(), "scatter_update"))
    }

    /// Replaces the whole value
    fn assign(&self, variable: &Variable, value: &ArrayD<f32>) -> Result<()> {
        let _ = (variable, value);
        Err(unimplemented(self.kind(), "assign"))
    }

    /// Reads the whole value or rows `indices` (axis 0)
    fn read(&self, variable: &Variable, indices: Option<&[usize]>) -> Result<ArrayD<f32>> {
        let _ = (variable, indices);
        Err(unimplemented(self.kind(), "read"))
    }

    /// Fully-qualified names of the variables in a collection
    fn collection(&self, name: &str) -> Result<Vec<String>> {
        let _ = name;
        Err(unimplemented(self.kind(), "collection"))
    }
}

fn unimplemented(backend: BackendKind, op: &'static str) -> GraphError {
    GraphError::Unimplemented { backend, op }
}

struct Slot {
    data: ArrayD<f32>,
    trainable: bool,
}

struct NdArrayStore {
    next_id: usize,
    slots: IndexMap<String, Slot>,
    rng: StdRng,
}

/// Reference backend storing variables as `ndarray` arrays.
///
/// Dynamic dimensions are allocated with length zero and grow on `assign`.
pub struct NdArrayBackend {
    store: Mutex<NdArrayStore>,
}

impl fmt::Debug for NdArrayBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.store.lock().map(|s| s.slots.len()).unwrap_or_default();
        f.debug_struct("NdArrayBackend").field("variables", &count).finish()
    }
}

impl Default for NdArrayBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NdArrayBackend {
    /// Create a backend with an entropy-seeded generator
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a backend with reproducible initial values
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            store: Mutex::new(NdArrayStore {
                next_id: 0,
                slots: IndexMap::new(),
                rng,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, NdArrayStore>> {
        self.store
            .lock()
            .map_err(|_| GraphError::Backend("variable store poisoned".to_string()))
    }
}

fn slot_mut<'a>(store: &'a mut NdArrayStore, variable: &Variable) -> Result<&'a mut Slot> {
    store
        .slots
        .get_mut(&variable.name)
        .ok_or_else(|| GraphError::Backend(format!("Unknown variable '{}'", variable.name)))
}

fn check_rows(len: usize, indices: &[usize], name: &str) -> Result<()> {
    match indices.iter().find(|&&i| i >= len) {
        Some(i) => Err(GraphError::Backend(format!(
            "Index {i} out of bounds for axis 0 of '{name}' (length {len})"
        ))),
        None => Ok(()),
    }
}

impl Backend for NdArrayBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NdArray
    }

    fn create_variable(&self, request: VariableRequest) -> Result<Variable> {
        let mut store = self.lock()?;
        if store.slots.contains_key(&request.name) {
            return Err(GraphError::NameConflict(request.name));
        }
        let dims: Vec<usize> = request.shape.iter().map(|d| d.unwrap_or(0)).collect();
        let data = request.initializer.materialize(&dims, &mut store.rng)?;

        let id = store.next_id;
        store.next_id += 1;
        store.slots.insert(
            request.name.clone(),
            Slot {
                data,
                trainable: request.trainable,
            },
        );
        tracing::trace!(variable = %request.name, shape = ?request.shape, "allocated variable");

        Ok(Variable {
            id,
            name: request.name,
            shape: request.shape,
            dtype: request.dtype,
            trainable: request.trainable,
        })
    }

    fn scatter_update(&self, variable: &Variable, indices: &[usize], updates: &ArrayD<f32>) -> Result<()> {
        let mut store = self.lock()?;
        let slot = slot_mut(&mut store, variable)?;
        let data_shape = slot.data.shape();
        if data_shape.is_empty()
            || updates.ndim() != data_shape.len()
            || updates.shape()[0] != indices.len()
            || updates.shape()[1..] != data_shape[1..]
        {
            return Err(GraphError::Backend(format!(
                "Updates of shape {:?} do not fit {} rows of '{}' {:?}",
                updates.shape(),
                indices.len(),
                variable.name,
                data_shape
            )));
        }
        check_rows(data_shape[0], indices, &variable.name)?;
        for (row, &index) in indices.iter().enumerate() {
            slot.data
                .index_axis_mut(Axis(0), index)
                .assign(&updates.index_axis(Axis(0), row));
        }
        Ok(())
    }

    fn assign(&self, variable: &Variable, value: &ArrayD<f32>) -> Result<()> {
        let compatible = value.ndim() == variable.shape.len()
            && variable
                .shape
                .iter()
                .zip(value.shape())
                .all(|(want, have)| want.map_or(true, |w| w == *have));
        if !compatible {
            return Err(GraphError::Backend(format!(
                "Cannot assign value of shape {:?} to '{}' {:?}",
                value.shape(),
                variable.name,
                variable.shape
            )));
        }
        let mut store = self.lock()?;
        slot_mut(&mut store, variable)?.data = value.clone();
        Ok(())
    }

    fn read(&self, variable: &Variable, indices: Option<&[usize]>) -> Result<ArrayD<f32>> {
        let mut store = self.lock()?;
        let slot = slot_mut(&mut store, variable)?;
        match indices {
            None => Ok(slot.data.clone()),
            Some(indices) => {
                if slot.data.ndim() == 0 {
                    return Err(GraphError::Backend(format!(
                        "Cannot gather rows from scalar '{}'",
                        variable.name
                    )));
                }
                check_rows(slot.data.shape()[0], indices, &variable.name)?;
                Ok(slot.data.select(Axis(0), indices))
            }
        }
    }

    fn collection(&self, name: &str) -> Result<Vec<String>> {
        let store = self.lock()?;
        let names = store
            .slots
            .iter()
            .filter(|(_, slot)| match name {
                TRAINABLE_VARIABLES => slot.trainable,
                GLOBAL_VARIABLES => true,
                _ => false,
            })
            .map(|(n, _)| n.clone())
            .collect();
        Ok(names)
    }
}
