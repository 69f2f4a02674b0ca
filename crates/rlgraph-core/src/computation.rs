//! Computations: methods bound to a component's input and output sockets

use std::fmt;
use std::sync::Arc;

use crate::config::ComputationSettings;
use crate::graph::{ComponentGraph, ComponentId, ComputationId, SocketId};
use crate::ops::{DataOp, OpContext};
use crate::socket::Connection;
use crate::{GraphError, Result};

/// Signature of a computation method
pub type ComputationFn = Arc<dyn Fn(&mut OpContext<'_>, &[DataOp]) -> Result<Vec<DataOp>> + Send + Sync>;

/// A named function with a declared number of inputs and outputs
#[derive(Clone)]
pub struct ComputationMethod {
    name: String,
    num_inputs: usize,
    num_outputs: usize,
    func: ComputationFn,
}

impl fmt::Debug for ComputationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationMethod")
            .field("name", &self.name)
            .field("num_inputs", &self.num_inputs)
            .field("num_outputs", &self.num_outputs)
            .finish_non_exhaustive()
    }
}

impl ComputationMethod {
    /// A method taking `num_inputs` ops and returning `num_outputs` ops
    pub fn new<F>(name: impl Into<String>, num_inputs: usize, num_outputs: usize, func: F) -> Self
    where
        F: Fn(&mut OpContext<'_>, &[DataOp]) -> Result<Vec<DataOp>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            num_inputs,
            num_outputs,
            func: Arc::new(func),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared input arity
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Declared output arity
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Runs the method and checks the number of returned ops
    pub(crate) fn call(&self, ctx: &mut OpContext<'_>, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let outputs = (self.func)(ctx, inputs)?;
        if outputs.len() != self.num_outputs {
            return Err(GraphError::Computation(format!(
                "method '{}' returned {} ops, declared {}",
                self.name,
                outputs.len(),
                self.num_outputs
            )));
        }
        Ok(outputs)
    }
}

/// Per-call overrides of the component's [`ComputationSettings`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputationOptions {
    /// Flatten container inputs into per-key ops
    pub flatten_ops: Option<bool>,
    /// Call the method once per flat key
    pub split_ops: Option<bool>,
    /// Expose the current flat key to the method
    pub add_auto_key_as_first_param: Option<bool>,
    /// Re-assemble per-key outputs
    pub unflatten_ops: Option<bool>,
}

impl ComputationOptions {
    /// Set `flatten_ops`
    #[must_use]
    pub fn flatten_ops(mut self, flatten: bool) -> Self {
        self.flatten_ops = Some(flatten);
        self
    }

    /// Set `split_ops`
    #[must_use]
    pub fn split_ops(mut self, split: bool) -> Self {
        self.split_ops = Some(split);
        self
    }

    /// Set `add_auto_key_as_first_param`
    #[must_use]
    pub fn add_auto_key_as_first_param(mut self, add_key: bool) -> Self {
        self.add_auto_key_as_first_param = Some(add_key);
        self
    }

    /// Set `unflatten_ops`
    #[must_use]
    pub fn unflatten_ops(mut self, unflatten: bool) -> Self {
        self.unflatten_ops = Some(unflatten);
        self
    }

    /// Fills unset flags from `defaults`
    #[must_use]
    pub fn resolve(&self, defaults: &ComputationSettings) -> ComputationSettings {
        ComputationSettings {
            flatten_ops: self.flatten_ops.unwrap_or(defaults.flatten_ops),
            split_ops: self.split_ops.unwrap_or(defaults.split_ops),
            add_auto_key_as_first_param: self
                .add_auto_key_as_first_param
                .unwrap_or(defaults.add_auto_key_as_first_param),
            unflatten_ops: self.unflatten_ops.unwrap_or(defaults.unflatten_ops),
        }
    }
}

/// A registered method bound to concrete sockets
#[derive(Debug, Clone)]
pub struct Computation {
    pub(crate) id: ComputationId,
    pub(crate) method: String,
    pub(crate) component: ComponentId,
    pub(crate) input_sockets: Vec<SocketId>,
    pub(crate) output_sockets: Vec<SocketId>,
    pub(crate) flags: ComputationSettings,
}

impl Computation {
    /// Arena id
    pub fn id(&self) -> ComputationId {
        self.id
    }

    /// Name of the bound method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Owning component
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Sockets feeding the method, in parameter order
    pub fn input_sockets(&self) -> &[SocketId] {
        &self.input_sockets
    }

    /// Sockets receiving the method's outputs, in return order
    pub fn output_sockets(&self) -> &[SocketId] {
        &self.output_sockets
    }

    /// Effective flags after merging with the component's settings
    pub fn flags(&self) -> &ComputationSettings {
        &self.flags
    }
}

impl ComponentGraph {
    /// Registers a method that computations of `component` may bind to
    pub fn register_method(&mut self, component: ComponentId, method: ComputationMethod) -> Result<()> {
        let owner = self.component_mut(component)?;
        if owner.methods.contains_key(&method.name) {
            return Err(GraphError::Configuration(format!(
                "method '{}' is already registered on component '{}'",
                method.name, owner.name
            )));
        }
        tracing::debug!(component = %owner.name, method = %method.name, "registering computation method");
        owner.methods.insert(method.name.clone(), method);
        Ok(())
    }

    /// Binds a registered method to sockets of `component`.
    ///
    /// With `method == None` the component must have exactly one registered
    /// method. Missing inputs are created as internal in-sockets; outputs
    /// must already exist.
    pub fn add_computation<I, O, S, T>(
        &mut self,
        component: ComponentId,
        inputs: I,
        outputs: O,
        method: Option<&str>,
        options: ComputationOptions,
    ) -> Result<ComputationId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        O: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let inputs: Vec<String> = inputs.into_iter().map(|s| s.as_ref().to_string()).collect();
        let outputs: Vec<String> = outputs.into_iter().map(|s| s.as_ref().to_string()).collect();

        let owner = self.component(component)?;
        let method = match method {
            Some(name) => owner.methods.get(name).ok_or_else(|| {
                GraphError::Configuration(format!(
                    "component '{}' has no computation method '{}'",
                    owner.name, name
                ))
            })?,
            None => match owner.methods.len() {
                1 => &owner.methods[0],
                n => {
                    return Err(GraphError::Configuration(format!(
                        "component '{}' has {} computation methods, cannot pick one without a name",
                        owner.name, n
                    )))
                }
            },
        };
        if inputs.len() != method.num_inputs || outputs.len() != method.num_outputs {
            return Err(GraphError::Configuration(format!(
                "method '{}' takes {} inputs and returns {} outputs, got {} and {}",
                method.name,
                method.num_inputs,
                method.num_outputs,
                inputs.len(),
                outputs.len()
            )));
        }
        let method_name = method.name.clone();
        let flags = ComputationOptions::resolve(&options, &owner.computation_settings);
        let owner_name = owner.name.clone();

        let mut output_sockets = Vec::with_capacity(outputs.len());
        for name in &outputs {
            let id = self
                .get_socket_by_name(component, name, None)?
                .ok_or_else(|| GraphError::SocketNotFound {
                    component: owner_name.clone(),
                    socket: name.clone(),
                    side: "out".to_string(),
                })?;
            output_sockets.push(id);
        }
        let mut input_sockets = Vec::with_capacity(inputs.len());
        for name in &inputs {
            input_sockets.push(self.ensure_internal_socket(component, name)?);
        }

        let id = ComputationId(self.computations.len());
        for &s in &input_sockets {
            self.sock_mut(s).outgoing.push(Connection::Computation(id));
        }
        for &s in &output_sockets {
            self.sock_mut(s).incoming.push(Connection::Computation(id));
        }
        tracing::debug!(
            component = %owner_name,
            method = %method_name,
            inputs = ?inputs,
            outputs = ?outputs,
            "adding computation"
        );
        self.computations.push(Computation {
            id,
            method: method_name,
            component,
            input_sockets,
            output_sockets,
            flags,
        });
        let owner = self.comp_mut(component);
        owner.computations.push(id);
        if inputs.is_empty() {
            owner.no_input_computations.push(id);
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArrayBackend;
    use crate::config::ComponentConfig;
    use crate::socket::SocketType;

    fn identity(name: &str, n: usize) -> ComputationMethod {
        ComputationMethod::new(name, n, n, |_, inputs| Ok(inputs.to_vec()))
    }

    fn setup() -> (ComponentGraph, ComponentId) {
        let mut g = ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(0)));
        let c = g.create_component(ComponentConfig::new("c")).unwrap();
        g.add_sockets(c, ["input", "output"], None, false).unwrap();
        (g, c)
    }

    #[test]
    fn test_unknown_method_is_configuration_error() {
        let (mut g, c) = setup();
        let err = g
            .add_computation(c, ["input"], ["output"], Some("double"), ComputationOptions::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
        assert!(g.get_socket_by_name(c, "double", None).unwrap().is_none());
    }

    #[test]
    fn test_implicit_method_needs_exactly_one() {
        let (mut g, c) = setup();
        let none = g.add_computation(c, ["input"], ["output"], None, ComputationOptions::default());
        assert!(matches!(none, Err(GraphError::Configuration(_))));

        g.register_method(c, identity("a", 1)).unwrap();
        g.add_computation(c, ["input"], ["output"], None, ComputationOptions::default())
            .unwrap();

        g.register_method(c, identity("b", 1)).unwrap();
        let many = g.add_computation(c, ["input"], ["output"], None, ComputationOptions::default());
        assert!(matches!(many, Err(GraphError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_method_and_arity() {
        let (mut g, c) = setup();
        g.register_method(c, identity("a", 1)).unwrap();
        assert!(g.register_method(c, identity("a", 1)).is_err());
        let err = g
            .add_computation(c, ["input", "other"], ["output"], Some("a"), ComputationOptions::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[test]
    fn test_registration_wires_sockets() {
        let (mut g, c) = setup();
        g.register_method(c, identity("a", 1)).unwrap();
        let id = g
            .add_computation(c, ["hidden"], ["output"], Some("a"), ComputationOptions::default().split_ops(true))
            .unwrap();

        let hidden = g.get_socket_by_name(c, "hidden", None).unwrap().unwrap();
        let hidden_socket = g.socket(hidden).unwrap();
        assert!(hidden_socket.is_internal());
        assert_eq!(hidden_socket.socket_type(), SocketType::In);
        assert_eq!(hidden_socket.outgoing_connections(), &[Connection::Computation(id)]);

        let output = g.get_output(c, None).unwrap();
        assert_eq!(g.socket(output).unwrap().incoming_connections(), &[Connection::Computation(id)]);

        let computation = g.computation(id).unwrap();
        assert!(computation.flags().split_ops);
        assert!(computation.flags().flatten_ops);
        assert_eq!(g.component(c).unwrap().computations(), &[id]);
        assert!(g.component(c).unwrap().no_input_computations().is_empty());
    }

    #[test]
    fn test_missing_output_socket() {
        let (mut g, c) = setup();
        g.register_method(c, identity("a", 1)).unwrap();
        let err = g
            .add_computation(c, ["input"], ["nowhere"], Some("a"), ComputationOptions::default())
            .unwrap_err();
        assert!(matches!(err, GraphError::SocketNotFound { .. }));
    }

    #[test]
    fn test_no_input_computations_are_filed() {
        let (mut g, c) = setup();
        g.register_method(c, ComputationMethod::new("constant", 0, 1, |_, _| Ok(Vec::new())))
            .unwrap();
        let id = g
            .add_computation(c, Vec::<&str>::new(), ["output"], None, ComputationOptions::default())
            .unwrap();
        assert_eq!(g.component(c).unwrap().no_input_computations(), &[id]);
    }

    #[test]
    fn test_options_merge_with_settings() {
        let settings = ComputationSettings {
            split_ops: true,
            ..ComputationSettings::default()
        };
        let flags = ComputationOptions::default().unflatten_ops(false).resolve(&settings);
        assert!(flags.split_ops);
        assert!(flags.flatten_ops);
        assert!(!flags.unflatten_ops);
        assert!(!flags.add_auto_key_as_first_param);
    }
}
