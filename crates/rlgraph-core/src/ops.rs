//! Ops produced while building a graph
//!
//! An op is a node of the built dataflow graph. The build driver creates a
//! placeholder op for every space fed into the graph; computations create
//! further ops from those through an [`OpContext`].

use std::fmt;

use crate::backend::Backend;
use crate::graph::{ComponentGraph, ComponentId};
use crate::spaces::Space;
use crate::variables::VariableValue;
use crate::{GraphError, Result};

/// Handle to a recorded op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub(crate) usize);

impl OpId {
    /// Position in the [`OpLog`]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// An op as seen by computations: its id and the space of its value
#[derive(Debug, Clone, PartialEq)]
pub struct DataOp {
    id: OpId,
    space: Space,
}

impl DataOp {
    /// Log id
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Space of the op's value
    pub fn space(&self) -> &Space {
        &self.space
    }
}

/// Everything known about one op
#[derive(Debug, Clone, PartialEq)]
pub struct OpRecord {
    /// Log id
    pub id: OpId,
    /// What produced the op, e.g. `placeholder` or a method-chosen label
    pub label: String,
    /// Component whose computation created the op
    pub component: Option<ComponentId>,
    /// Ops this one was computed from
    pub inputs: Vec<OpId>,
    /// Space of the op's value
    pub space: Space,
}

/// Append-only record of all ops of one build
#[derive(Debug, Clone, Default)]
pub struct OpLog {
    records: Vec<OpRecord>,
}

impl OpLog {
    pub(crate) fn push(
        &mut self,
        label: impl Into<String>,
        component: Option<ComponentId>,
        inputs: Vec<OpId>,
        space: Space,
    ) -> DataOp {
        let id = OpId(self.records.len());
        let label = label.into();
        tracing::trace!(op = %id, label = %label, space = %space, "recording op");
        self.records.push(OpRecord {
            id,
            label,
            component,
            inputs,
            space: space.clone(),
        });
        DataOp { id, space }
    }

    /// Record of `id`
    pub fn get(&self, id: OpId) -> Option<&OpRecord> {
        self.records.get(id.0)
    }

    /// All records in creation order
    pub fn records(&self) -> &[OpRecord] {
        &self.records
    }

    /// Records whose label equals `label`
    pub fn with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a OpRecord> + 'a {
        self.records.iter().filter(move |r| r.label == label)
    }

    /// Number of ops
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no op was recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Handed to computation methods while they run
pub struct OpContext<'a> {
    pub(crate) log: &'a mut OpLog,
    pub(crate) graph: &'a ComponentGraph,
    pub(crate) component: ComponentId,
    pub(crate) key: Option<String>,
}

impl<'a> OpContext<'a> {
    /// Records a new op computed from `inputs`
    pub fn op(&mut self, label: impl Into<String>, inputs: &[&DataOp], space: Space) -> DataOp {
        let inputs = inputs.iter().map(|op| op.id).collect();
        self.log.push(label, Some(self.component), inputs, space)
    }

    /// Flat key of the current split call; `Some` only when the computation
    /// asked for it with `add_auto_key_as_first_param`
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// The component running the computation
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// A variable from the running component's registry
    pub fn variable(&self, name: &str) -> Result<&VariableValue> {
        let component = self.graph.comp(self.component);
        component
            .variables
            .get(name)
            .ok_or_else(|| GraphError::VariableNotFound {
                component: component.name.clone(),
                variable: name.to_string(),
            })
    }

    /// Backend of the graph being built
    pub fn backend(&self) -> &dyn Backend {
        self.graph.backend.as_ref()
    }

    /// Looks up an op recorded earlier in this build
    pub fn record(&self, id: OpId) -> Option<&OpRecord> {
        self.log.get(id)
    }
}
