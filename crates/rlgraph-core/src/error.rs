//! Error types for graph assembly

use thiserror::Error;

use crate::backend::BackendKind;

/// Core error type for component graph assembly.
///
/// Every variant signals a programmer error made while wiring the graph;
/// none of them is worth retrying.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Scope does not match `^[\w\-]*$`
    #[error("Scope '{0}' does not match scope-pattern! Needs to be \\w or '-'")]
    ScopeFormat(String),

    /// Socket name collision inside one component
    #[error("Socket of name '{socket}' already exists in component '{component}'")]
    DuplicateSocket {
        /// Component name
        component: String,
        /// Socket name
        socket: String,
    },

    /// Sub-component name collision inside one parent
    #[error("Sub-component with name '{0}' already exists in '{1}'")]
    DuplicateComponent(String, String),

    /// Component already has a parent
    #[error("Component '{0}' has already been added once to a container component")]
    AlreadyAdded(String),

    /// "Only socket" request without exactly one candidate
    #[error("Cannot return only {side}-socket of '{component}': {count} candidates")]
    AmbiguousSocket {
        /// Component name
        component: String,
        /// Requested side
        side: String,
        /// Number of candidates
        count: usize,
    },

    /// Socket spec could not be resolved
    #[error("No '{side}'-socket named '{socket}' found in '{component}'")]
    SocketNotFound {
        /// Component name
        component: String,
        /// Socket name
        socket: String,
        /// Requested side
        side: String,
    },

    /// Socket type could not be inferred from its name
    #[error("Cannot infer socket type (in/out) from socket name: '{0}'")]
    NameInference(String),

    /// Directional violation
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Two sockets of one component connected to each other
    #[error("Cannot connect two sockets ('{0}', '{1}') that belong to the same component '{2}'")]
    SameComponentConnection(String, String, String),

    /// Ambiguous or contradictory configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Getter-mode variable miss
    #[error("Variable with name '{variable}' not found in registry of component '{component}'")]
    VariableNotFound {
        /// Component whose registry was searched
        component: String,
        /// Requested name
        variable: String,
    },

    /// Backend refused a duplicate fully-qualified variable name
    #[error("Variable '{0}' already exists in the backend namespace")]
    NameConflict(String),

    /// Operation not provided by the selected backend
    #[error("Operation '{op}' is not implemented for backend {backend:?}")]
    Unimplemented {
        /// Backend lacking the op
        backend: BackendKind,
        /// Op name
        op: &'static str,
    },

    /// Components left without resolved input spaces after a build
    #[error("Components not input-complete after build: {0:?}")]
    IncompleteBuild(Vec<String>),

    /// Id does not address a component of this graph
    #[error("Component id {0} not found")]
    ComponentNotFound(usize),

    /// Computation method failed or returned the wrong arity
    #[error("Computation error: {0}")]
    Computation(String),

    /// Backend-side failure (storage, shapes, indices)
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
