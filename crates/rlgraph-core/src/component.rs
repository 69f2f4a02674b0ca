//! Components and sub-component composition

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

use crate::computation::ComputationMethod;
use crate::config::{ComponentConfig, ComputationSettings};
use crate::graph::{ComponentGraph, ComponentId, ComputationId, SocketId};
use crate::socket::{SocketSpec, SocketType};
use crate::variables::{VariableHook, VariableValue};
use crate::{GraphError, Result};

lazy_static! {
    static ref SCOPE_REGEX: Regex = Regex::new(r"^[\w\-]*$").unwrap();
}

/// A node of the component tree.
///
/// Components are created with [`ComponentGraph::create_component`] and
/// mutated only through the graph.
pub struct Component {
    pub(crate) id: ComponentId,
    pub(crate) scope: String,
    pub(crate) name: String,
    pub(crate) device: Option<String>,
    pub(crate) global_component: bool,
    pub(crate) computation_settings: ComputationSettings,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) has_been_added: bool,
    pub(crate) sub_components: IndexMap<String, ComponentId>,
    pub(crate) input_sockets: Vec<SocketId>,
    pub(crate) output_sockets: Vec<SocketId>,
    pub(crate) internal_sockets: Vec<SocketId>,
    pub(crate) methods: IndexMap<String, ComputationMethod>,
    pub(crate) computations: Vec<ComputationId>,
    pub(crate) no_input_computations: Vec<ComputationId>,
    pub(crate) variables: IndexMap<String, VariableValue>,
    pub(crate) variable_hook: Option<VariableHook>,
    pub(crate) input_complete: bool,
    pub(crate) variables_created: bool,
    pub(crate) sockets_to_do_later: Vec<SocketId>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("sub_components", &self.sub_components)
            .field("input_sockets", &self.input_sockets)
            .field("output_sockets", &self.output_sockets)
            .field("internal_sockets", &self.internal_sockets)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("input_complete", &self.input_complete)
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Arena id
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Naming token for backend variables
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Name among siblings
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device placement hint
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Part of the shared global model
    pub fn is_global(&self) -> bool {
        self.global_component
    }

    /// Defaults for this component's computations
    pub fn computation_settings(&self) -> &ComputationSettings {
        &self.computation_settings
    }

    /// Containing component, if added to one
    pub fn parent(&self) -> Option<ComponentId> {
        self.parent
    }

    /// Set once this component has been given a parent; never reset
    pub fn has_been_added(&self) -> bool {
        self.has_been_added
    }

    /// Direct children by name, in insertion order
    pub fn sub_components(&self) -> &IndexMap<String, ComponentId> {
        &self.sub_components
    }

    /// Non-internal in-sockets
    pub fn input_sockets(&self) -> &[SocketId] {
        &self.input_sockets
    }

    /// Out-sockets
    pub fn output_sockets(&self) -> &[SocketId] {
        &self.output_sockets
    }

    /// Internal sockets
    pub fn internal_sockets(&self) -> &[SocketId] {
        &self.internal_sockets
    }

    /// In, out and internal sockets, in that order
    pub fn all_sockets(&self) -> impl Iterator<Item = SocketId> + '_ {
        self.input_sockets
            .iter()
            .chain(&self.output_sockets)
            .chain(&self.internal_sockets)
            .copied()
    }

    /// Names of the registered computation methods
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Computations in registration order
    pub fn computations(&self) -> &[ComputationId] {
        &self.computations
    }

    /// Computations without in-sockets; input-driven traversal cannot reach them
    pub fn no_input_computations(&self) -> &[ComputationId] {
        &self.no_input_computations
    }

    /// Variable registry by registered name
    pub fn variables(&self) -> &IndexMap<String, VariableValue> {
        &self.variables
    }

    /// Whether every in-socket had a resolved space during the last build
    pub fn is_input_complete(&self) -> bool {
        self.input_complete
    }

    /// Sockets whose computations wait for this component to become input-complete
    pub fn sockets_to_do_later(&self) -> &[SocketId] {
        &self.sockets_to_do_later
    }
}

/// Which sockets of a sub-component get exposed on its parent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectSpec {
    /// Expose nothing
    #[default]
    None,
    /// Expose one socket under its own name
    Socket(String),
    /// Expose several sockets, each kept or renamed
    Sockets(Vec<ExposeEntry>),
    /// Expose all in-sockets
    Inputs,
    /// Expose all out-sockets
    Outputs,
    /// Expose all in- and out-sockets
    All,
}

/// One entry of [`ConnectSpec::Sockets`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposeEntry {
    /// Keep the name
    Keep(String),
    /// `old` becomes `new` on the parent
    Rename(String, String),
    /// Several renames at once
    Map(IndexMap<String, String>),
}

impl From<&str> for ConnectSpec {
    fn from(name: &str) -> Self {
        Self::Socket(name.to_string())
    }
}

impl From<bool> for ConnectSpec {
    fn from(all: bool) -> Self {
        if all {
            Self::All
        } else {
            Self::None
        }
    }
}

impl From<&str> for ExposeEntry {
    fn from(name: &str) -> Self {
        Self::Keep(name.to_string())
    }
}

impl From<(&str, &str)> for ExposeEntry {
    fn from((old, new): (&str, &str)) -> Self {
        Self::Rename(old.to_string(), new.to_string())
    }
}

/// Connect specs for [`ComponentGraph::add_components`]
#[derive(Debug, Clone, Default)]
pub enum ComponentsConnect {
    /// The same spec for every component
    Each(ConnectSpec),
    /// Per component name; absent names expose nothing
    ByName(HashMap<String, ConnectSpec>),
    /// Expose nothing
    #[default]
    Nothing,
}

impl ComponentGraph {
    /// Creates a detached component.
    ///
    /// Fails with [`GraphError::ScopeFormat`] unless the scope matches `^[\w\-]*$`.
    pub fn create_component(&mut self, config: ComponentConfig) -> Result<ComponentId> {
        if !SCOPE_REGEX.is_match(&config.scope) {
            return Err(GraphError::ScopeFormat(config.scope));
        }
        let id = ComponentId(self.components.len());
        let name = config.resolved_name().to_string();
        tracing::debug!(component = %name, scope = %config.scope, "creating component");
        self.components.push(Component {
            id,
            scope: config.scope,
            name,
            device: config.device,
            global_component: config.global_component,
            computation_settings: config.computation_settings,
            parent: None,
            has_been_added: false,
            sub_components: IndexMap::new(),
            input_sockets: Vec::new(),
            output_sockets: Vec::new(),
            internal_sockets: Vec::new(),
            methods: IndexMap::new(),
            computations: Vec::new(),
            no_input_computations: Vec::new(),
            variables: IndexMap::new(),
            variable_hook: None,
            input_complete: false,
            variables_created: false,
            sockets_to_do_later: Vec::new(),
        });
        Ok(id)
    }

    /// Sets the hook that creates `component`'s variables once it is input-complete
    pub fn set_variable_hook(&mut self, component: ComponentId, hook: VariableHook) -> Result<()> {
        self.component_mut(component)?.variable_hook = Some(hook);
        Ok(())
    }

    /// Adds `child` as a sub-component of `parent` and exposes the sockets
    /// selected by `connect` on `parent`.
    ///
    /// Exposed in-sockets are fed from a (possibly new) in-socket of the
    /// parent; exposed out-sockets feed a (possibly new) out-socket of the
    /// parent.
    pub fn add_component(
        &mut self,
        parent: ComponentId,
        child: ComponentId,
        connect: impl Into<ConnectSpec>,
    ) -> Result<()> {
        let connect = connect.into();
        let child_node = self.component(child)?;
        let child_name = child_node.name.clone();
        let parent_node = self.component(parent)?;

        if parent_node.sub_components.contains_key(&child_name) {
            return Err(GraphError::DuplicateComponent(child_name, parent_node.name.clone()));
        }
        if child_node.has_been_added || parent == child {
            return Err(GraphError::AlreadyAdded(child_name));
        }
        let mut ancestor = parent_node.parent;
        while let Some(a) = ancestor {
            if a == child {
                return Err(GraphError::Configuration(format!(
                    "Cannot add '{child_name}' below its own descendant '{}'",
                    parent_node.name
                )));
            }
            ancestor = self.component(a)?.parent;
        }
        let mut expose = Vec::new();
        for (socket_name, exposed_name) in self.normalize_connect_spec(child, &connect) {
            let socket = self
                .get_socket_by_name(child, &socket_name, None)?
                .ok_or_else(|| GraphError::SocketNotFound {
                    component: child_name.clone(),
                    socket: socket_name.clone(),
                    side: "??".to_string(),
                })?;
            expose.push((socket_name, exposed_name, self.sock(socket).socket_type));
        }

        {
            let child_node = self.comp_mut(child);
            child_node.has_been_added = true;
            child_node.parent = Some(parent);
        }
        self.comp_mut(parent).sub_components.insert(child_name.clone(), child);
        tracing::debug!(
            parent = %self.comp(parent).name,
            child = %child_name,
            exposed = expose.len(),
            "added sub-component"
        );

        for (socket_name, exposed_name, socket_type) in expose {
            if self.get_socket_by_name(parent, &exposed_name, None)?.is_none() {
                self.add_sockets(parent, [exposed_name.as_str()], Some(socket_type), false)?;
            }
            let exposed = SocketSpec::Named(exposed_name);
            let inner = SocketSpec::Foreign(child, socket_name);
            match socket_type {
                SocketType::In => self.connect(parent, exposed, inner)?,
                SocketType::Out => self.connect(parent, inner, exposed)?,
            }
        }
        Ok(())
    }

    /// Adds several sub-components, each with its own or a shared connect spec
    pub fn add_components(
        &mut self,
        parent: ComponentId,
        children: &[ComponentId],
        connect: &ComponentsConnect,
    ) -> Result<()> {
        for &child in children {
            let spec = match connect {
                ComponentsConnect::Each(spec) => spec.clone(),
                ComponentsConnect::ByName(specs) => {
                    let name = &self.component(child)?.name;
                    specs.get(name).cloned().unwrap_or_default()
                }
                ComponentsConnect::Nothing => ConnectSpec::None,
            };
            self.add_component(parent, child, spec)?;
        }
        Ok(())
    }

    /// Ordered `child socket name -> exposed name` mapping
    fn normalize_connect_spec(&self, child: ComponentId, connect: &ConnectSpec) -> IndexMap<String, String> {
        let child = self.comp(child);
        let names = |ids: &[SocketId]| -> Vec<(String, String)> {
            ids.iter()
                .map(|&id| (self.sock(id).name.clone(), self.sock(id).name.clone()))
                .collect()
        };
        let mut expose = IndexMap::new();
        match connect {
            ConnectSpec::None => {}
            ConnectSpec::Inputs => expose.extend(names(&child.input_sockets)),
            ConnectSpec::Outputs => expose.extend(names(&child.output_sockets)),
            ConnectSpec::All => {
                expose.extend(names(&child.input_sockets));
                expose.extend(names(&child.output_sockets));
            }
            ConnectSpec::Socket(name) => {
                expose.insert(name.clone(), name.clone());
            }
            ConnectSpec::Sockets(entries) => {
                for entry in entries {
                    match entry {
                        ExposeEntry::Keep(name) => {
                            expose.insert(name.clone(), name.clone());
                        }
                        ExposeEntry::Rename(old, new) => {
                            expose.insert(old.clone(), new.clone());
                        }
                        ExposeEntry::Map(map) => {
                            expose.extend(map.iter().map(|(o, n)| (o.clone(), n.clone())));
                        }
                    }
                }
            }
        }
        expose
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArrayBackend;
    use crate::socket::Connection;
    use std::sync::Arc;

    fn graph() -> ComponentGraph {
        ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(0)))
    }

    fn one_to_one(g: &mut ComponentGraph, scope: &str) -> ComponentId {
        let c = g.create_component(ComponentConfig::new(scope)).unwrap();
        g.add_sockets(c, ["input", "output"], None, false).unwrap();
        c
    }

    #[test]
    fn test_scope_format() {
        let mut g = graph();
        assert!(g.create_component(ComponentConfig::new("layer-1_a")).is_ok());
        assert!(g.create_component(ComponentConfig::new("")).is_ok());
        let err = g.create_component(ComponentConfig::new("bad/scope")).unwrap_err();
        assert!(matches!(err, GraphError::ScopeFormat(s) if s == "bad/scope"));
    }

    #[test]
    fn test_add_component_twice_fails() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let other = g.create_component(ComponentConfig::new("other")).unwrap();
        let q = one_to_one(&mut g, "q");

        g.add_component(p, q, ConnectSpec::None).unwrap();
        assert!(g.component(q).unwrap().has_been_added());
        assert_eq!(g.component(q).unwrap().parent(), Some(p));

        let err = g.add_component(other, q, ConnectSpec::None).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyAdded(name) if name == "q"));
        assert!(g.component(q).unwrap().has_been_added());
    }

    #[test]
    fn test_add_ancestor_below_descendant_fails() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let q = g.create_component(ComponentConfig::new("q")).unwrap();
        let r = g.create_component(ComponentConfig::new("r")).unwrap();
        g.add_component(p, q, ConnectSpec::None).unwrap();
        g.add_component(q, r, ConnectSpec::None).unwrap();

        let err = g.add_component(q, p, ConnectSpec::None).unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
        let err = g.add_component(r, p, ConnectSpec::None).unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));

        assert_eq!(g.component(p).unwrap().parent(), None);
        assert!(!g.component(p).unwrap().has_been_added());
        assert!(g.component(r).unwrap().sub_components().is_empty());
        assert_eq!(g.subtree(p).unwrap(), vec![p, q, r]);
        assert_eq!(g.full_scope(r).unwrap(), "p/q/r");
    }

    #[test]
    fn test_duplicate_sibling_names() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let a = g.create_component(ComponentConfig::new("dense")).unwrap();
        let b = g.create_component(ComponentConfig::new("other").with_name("dense")).unwrap();
        g.add_component(p, a, ConnectSpec::None).unwrap();
        let err = g.add_component(p, b, ConnectSpec::None).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateComponent(..)));
        assert!(!g.component(b).unwrap().has_been_added());
    }

    #[test]
    fn test_connect_all_exposes_sockets() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let q = one_to_one(&mut g, "q");
        g.add_component(p, q, true).unwrap();

        let p_in = g.get_input(p, Some("input")).unwrap();
        let p_out = g.get_output(p, Some("output")).unwrap();
        let q_in = g.get_input(q, Some("input")).unwrap();
        let q_out = g.get_output(q, Some("output")).unwrap();

        assert_eq!(g.socket(p_in).unwrap().outgoing_connections(), &[Connection::Socket(q_in)]);
        assert_eq!(g.socket(q_in).unwrap().incoming_connections(), &[Connection::Socket(p_in)]);
        assert_eq!(g.socket(q_out).unwrap().outgoing_connections(), &[Connection::Socket(p_out)]);
        assert_eq!(g.socket(p_out).unwrap().incoming_connections(), &[Connection::Socket(q_out)]);
    }

    #[test]
    fn test_connect_spec_renames() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let q = one_to_one(&mut g, "q");
        let spec = ConnectSpec::Sockets(vec![
            ExposeEntry::from(("input", "exposed-in")),
            ExposeEntry::Map(IndexMap::from([("output".to_string(), "exposed-out".to_string())])),
        ]);
        g.add_component(p, q, spec).unwrap();

        let exposed_in = g.get_input(p, Some("exposed-in")).unwrap();
        assert_eq!(g.socket(exposed_in).unwrap().socket_type(), SocketType::In);
        let exposed_out = g.get_output(p, Some("exposed-out")).unwrap();
        assert_eq!(g.socket(exposed_out).unwrap().incoming_connections().len(), 1);
        assert!(g.get_socket_by_name(p, "input", None).unwrap().is_none());
    }

    #[test]
    fn test_connect_inputs_only_and_missing_socket() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let q = one_to_one(&mut g, "q");
        g.add_component(p, q, ConnectSpec::Inputs).unwrap();
        assert_eq!(g.component(p).unwrap().input_sockets().len(), 1);
        assert!(g.component(p).unwrap().output_sockets().is_empty());

        let r = one_to_one(&mut g, "r");
        let err = g.add_component(p, r, "nope").unwrap_err();
        assert!(matches!(err, GraphError::SocketNotFound { .. }));
    }

    #[test]
    fn test_add_components_by_name() {
        let mut g = graph();
        let p = g.create_component(ComponentConfig::new("p")).unwrap();
        let a = one_to_one(&mut g, "a");
        let b = one_to_one(&mut g, "b");
        let specs = HashMap::from([("a".to_string(), ConnectSpec::Outputs)]);
        g.add_components(p, &[a, b], &ComponentsConnect::ByName(specs)).unwrap();

        let parent = g.component(p).unwrap();
        assert_eq!(parent.sub_components().len(), 2);
        assert_eq!(parent.output_sockets().len(), 1);
        assert!(parent.input_sockets().is_empty());
        assert_eq!(g.describe(p).unwrap(), "Component('p' in=[] out=[output])");
    }
}
