//! Component/socket graph assembly for reinforcement learning graphs
//!
//! Components expose named input and output sockets, bind computation
//! methods to them and nest inside each other. Once wired, a
//! [`GraphBuilder`] deduces the [`Space`] reaching every socket, creates
//! each component's variables as soon as its inputs are known and records
//! the ops produced by its computations.
//!
//! All state lives in one [`ComponentGraph`] arena addressed by typed ids.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

/// Execution backends and variable allocation
pub mod backend;
/// Deep copies of component subtrees
pub mod blueprint;
/// Space propagation and computation firing
pub mod builder;
/// Components and sub-component composition
pub mod component;
/// Computation methods and their socket bindings
pub mod computation;
/// Serde-backed configuration
pub mod config;
/// Socket linking between components
pub mod connect;
/// Error type
pub mod error;
/// The component arena
pub mod graph;
/// Data ops and the op log
pub mod ops;
/// Sockets and their connections
pub mod socket;
/// Spaces describing data shapes and types
pub mod spaces;
/// Variable creation and lookup
pub mod variables;

// Re-export core types
pub use backend::{Backend, BackendKind, Initializer, NdArrayBackend, Variable, VariableRequest};
pub use blueprint::ComponentBlueprint;
pub use builder::{BuildReport, GraphBuilder};
pub use component::{Component, ComponentsConnect, ConnectSpec, ExposeEntry};
pub use computation::{Computation, ComputationMethod, ComputationOptions};
pub use config::{BuildConfig, ComponentConfig, ComputationSettings};
pub use connect::Endpoint;
pub use error::{GraphError, Result};
pub use graph::{ComponentGraph, ComponentId, ComputationId, SocketId};
pub use ops::{DataOp, OpContext, OpId, OpLog, OpRecord};
pub use socket::{Connection, Socket, SocketSpec, SocketType};
pub use spaces::{BoxSpace, DType, Space};
pub use variables::{BatchRank, SpaceSource, VariableHook, VariableSpec, VariableValue};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BuildConfig, ComponentConfig, ComponentGraph, ComponentId, ComputationMethod,
        ComputationOptions, ConnectSpec, DataOp, GraphBuilder, GraphError, NdArrayBackend,
        OpContext, Result, SocketType, Space, VariableSpec,
    };
}
