//! Component blueprints and instantiation
//!
//! A blueprint is an immutable description of a component subtree: its
//! sockets, methods, computations, variable hooks and the wiring between its
//! own members. Instantiating a blueprint allocates fresh components,
//! sockets and connection lists, so nothing is shared with the original.
//! Connections leaving the subtree are not part of a blueprint.

use std::fmt;

use crate::component::ConnectSpec;
use crate::computation::{ComputationMethod, ComputationOptions};
use crate::config::{ComponentConfig, ComputationSettings};
use crate::graph::{ComponentGraph, ComponentId, SocketId};
use crate::socket::{Connection, SocketType};
use crate::spaces::Space;
use crate::variables::VariableHook;
use crate::Result;

/// Path of sub-component names below the blueprint root
type Path = Vec<String>;

#[derive(Debug, Clone, PartialEq)]
struct SocketBlueprint {
    name: String,
    socket_type: SocketType,
    internal: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct ComputationBlueprint {
    method: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    flags: ComputationSettings,
}

#[derive(Debug, Clone, PartialEq)]
struct Link {
    from: (Path, String),
    to: (Path, String),
}

#[derive(Debug, Clone, PartialEq)]
struct SpaceBinding {
    socket: (Path, String),
    space: Space,
    /// Space feeds the socket (true) or the socket feeds the space
    incoming: bool,
}

/// Immutable description of a component subtree
#[derive(Clone)]
pub struct ComponentBlueprint {
    config: ComponentConfig,
    sockets: Vec<SocketBlueprint>,
    methods: Vec<ComputationMethod>,
    computations: Vec<ComputationBlueprint>,
    hook: Option<VariableHook>,
    sub_components: Vec<ComponentBlueprint>,
    links: Vec<Link>,
    space_bindings: Vec<SpaceBinding>,
}

impl fmt::Debug for ComponentBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBlueprint")
            .field("config", &self.config)
            .field("sockets", &self.sockets)
            .field("methods", &self.methods)
            .field("computations", &self.computations)
            .field("has_hook", &self.hook.is_some())
            .field("sub_components", &self.sub_components)
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl ComponentBlueprint {
    /// Configuration of the captured component
    pub fn config(&self) -> &ComponentConfig {
        &self.config
    }

    /// Blueprints of the direct children
    pub fn sub_components(&self) -> &[ComponentBlueprint] {
        &self.sub_components
    }

    /// Number of socket-to-socket links inside the subtree
    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}

impl ComponentGraph {
    /// Captures the subtree rooted at `component`
    pub fn blueprint(&self, component: ComponentId) -> Result<ComponentBlueprint> {
        let mut bp = self.blueprint_node(component)?;
        let members = self.subtree(component)?;

        for &member in &members {
            let path = self.relative_path(component, member);
            for socket in self.comp(member).all_sockets() {
                let s = self.sock(socket);
                for connection in &s.outgoing {
                    match connection {
                        Connection::Socket(target) => {
                            let t = self.sock(*target);
                            if members.contains(&t.component) {
                                bp.links.push(Link {
                                    from: (path.clone(), s.name.clone()),
                                    to: (self.relative_path(component, t.component), t.name.clone()),
                                });
                            }
                        }
                        Connection::Space(space) if member != component => bp.space_bindings.push(SpaceBinding {
                            socket: (path.clone(), s.name.clone()),
                            space: space.clone(),
                            incoming: false,
                        }),
                        _ => {}
                    }
                }
                if member == component {
                    continue;
                }
                for connection in &s.incoming {
                    if let Connection::Space(space) = connection {
                        bp.space_bindings.push(SpaceBinding {
                            socket: (path.clone(), s.name.clone()),
                            space: space.clone(),
                            incoming: true,
                        });
                    }
                }
            }
        }
        Ok(bp)
    }

    fn blueprint_node(&self, component: ComponentId) -> Result<ComponentBlueprint> {
        let c = self.component(component)?;
        let sockets = c
            .all_sockets()
            .map(|id| {
                let s = self.sock(id);
                SocketBlueprint {
                    name: s.name.clone(),
                    socket_type: s.socket_type,
                    internal: s.internal,
                }
            })
            .collect();
        let socket_names = |ids: &[SocketId]| -> Vec<String> {
            ids.iter().map(|&s| self.sock(s).name.clone()).collect()
        };
        let computations = c
            .computations
            .iter()
            .map(|&id| {
                let comp = &self.computations[id.index()];
                ComputationBlueprint {
                    method: comp.method.clone(),
                    inputs: socket_names(&comp.input_sockets),
                    outputs: socket_names(&comp.output_sockets),
                    flags: comp.flags,
                }
            })
            .collect();
        let sub_components = c
            .sub_components
            .values()
            .map(|&sub| self.blueprint_node(sub))
            .collect::<Result<Vec<_>>>()?;

        Ok(ComponentBlueprint {
            config: ComponentConfig {
                scope: c.scope.clone(),
                name: Some(c.name.clone()),
                device: c.device.clone(),
                global_component: c.global_component,
                computation_settings: c.computation_settings,
            },
            sockets,
            methods: c.methods.values().cloned().collect(),
            computations,
            hook: c.variable_hook.clone(),
            sub_components,
            links: Vec::new(),
            space_bindings: Vec::new(),
        })
    }

    fn relative_path(&self, root: ComponentId, member: ComponentId) -> Path {
        let mut path = Vec::new();
        let mut current = member;
        while current != root {
            let c = self.comp(current);
            path.push(c.name.clone());
            match c.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Allocates a fresh, unparented component subtree from `blueprint`.
    ///
    /// `scope` replaces the root's scope; the root's name becomes `name`,
    /// else the new scope, else the blueprint's name.
    pub fn instantiate(
        &mut self,
        blueprint: &ComponentBlueprint,
        name: Option<&str>,
        scope: Option<&str>,
    ) -> Result<ComponentId> {
        let mut config = blueprint.config.clone();
        if let Some(scope) = scope {
            config.scope = scope.to_string();
            config.name = Some(scope.to_string());
        }
        if let Some(name) = name {
            config.name = Some(name.to_string());
        }
        let root = self.instantiate_node(blueprint, config)?;

        for link in &blueprint.links {
            let from = self.socket_at(root, &link.from)?;
            let to = self.socket_at(root, &link.to)?;
            self.connect(root, from, to)?;
        }
        for binding in &blueprint.space_bindings {
            let socket = self.socket_at(root, &binding.socket)?;
            if binding.incoming {
                self.connect(root, binding.space.clone(), socket)?;
            } else {
                self.connect(root, socket, binding.space.clone())?;
            }
        }
        tracing::debug!(
            component = %self.comp(root).name,
            links = blueprint.links.len(),
            "instantiated blueprint"
        );
        Ok(root)
    }

    fn instantiate_node(&mut self, blueprint: &ComponentBlueprint, config: ComponentConfig) -> Result<ComponentId> {
        let id = self.create_component(config)?;
        for socket in &blueprint.sockets {
            self.add_sockets(id, [socket.name.as_str()], Some(socket.socket_type), socket.internal)?;
        }
        for method in &blueprint.methods {
            self.register_method(id, method.clone())?;
        }
        for computation in &blueprint.computations {
            let options = ComputationOptions {
                flatten_ops: Some(computation.flags.flatten_ops),
                split_ops: Some(computation.flags.split_ops),
                add_auto_key_as_first_param: Some(computation.flags.add_auto_key_as_first_param),
                unflatten_ops: Some(computation.flags.unflatten_ops),
            };
            self.add_computation(
                id,
                &computation.inputs,
                &computation.outputs,
                Some(computation.method.as_str()),
                options,
            )?;
        }
        if let Some(hook) = &blueprint.hook {
            self.set_variable_hook(id, hook.clone())?;
        }
        for sub in &blueprint.sub_components {
            let child = self.instantiate_node(sub, sub.config.clone())?;
            self.add_component(id, child, ConnectSpec::None)?;
        }
        Ok(id)
    }

    fn socket_at(&self, root: ComponentId, (path, name): &(Path, String)) -> Result<SocketId> {
        let mut current = root;
        for step in path {
            current = *self.comp(current).sub_components.get(step).ok_or_else(|| {
                crate::GraphError::Configuration(format!("blueprint path '{}' does not exist", path.join("/")))
            })?;
        }
        self.get_socket(current, name.as_str(), None)
    }

    /// Structurally identical, unparented copy of `component` with fresh state.
    ///
    /// Scope defaults to the original's and the name to the scope. Internal
    /// wiring is reproduced; the copy's external connections start empty.
    pub fn copy(&mut self, component: ComponentId, name: Option<&str>, scope: Option<&str>) -> Result<ComponentId> {
        let blueprint = self.blueprint(component)?;
        let scope = scope.map_or_else(|| blueprint.config.scope.clone(), str::to_string);
        self.instantiate(&blueprint, name, Some(scope.as_str()))
    }
}
