//! Connecting and disconnecting sockets, spaces and components

use serde_json::Value;

use crate::graph::{ComponentGraph, ComponentId, SocketId};
use crate::socket::{Connection, SocketSpec, SocketType};
use crate::spaces::Space;
use crate::{GraphError, Result};

/// One side of a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// A space bound directly to the socket on the other side
    Space(Space),
    /// A space in its JSON form, see [`Space::from_spec`]
    SpaceSpec(Value),
    /// The sole out-socket (as source) or in-socket (as destination) of a component
    Component(ComponentId),
    /// A socket
    Socket(SocketSpec),
}

impl From<Space> for Endpoint {
    fn from(space: Space) -> Self {
        Self::Space(space)
    }
}

impl From<Value> for Endpoint {
    fn from(spec: Value) -> Self {
        Self::SpaceSpec(spec)
    }
}

impl From<ComponentId> for Endpoint {
    fn from(component: ComponentId) -> Self {
        Self::Component(component)
    }
}

impl From<SocketSpec> for Endpoint {
    fn from(spec: SocketSpec) -> Self {
        Self::Socket(spec)
    }
}

impl From<SocketId> for Endpoint {
    fn from(id: SocketId) -> Self {
        Self::Socket(SocketSpec::Id(id))
    }
}

impl From<&str> for Endpoint {
    fn from(name: &str) -> Self {
        Self::Socket(SocketSpec::from(name))
    }
}

impl From<String> for Endpoint {
    fn from(name: String) -> Self {
        Self::Socket(SocketSpec::Named(name))
    }
}

impl From<(ComponentId, &str)> for Endpoint {
    fn from(foreign: (ComponentId, &str)) -> Self {
        Self::Socket(SocketSpec::from(foreign))
    }
}

enum Resolved {
    Space(Space),
    Socket(SocketId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Connect,
    Disconnect,
}

impl ComponentGraph {
    /// Connects `from` to `to` in the namespace of `component`.
    ///
    /// A space may only feed an in-socket or be fed by an out-socket. Two
    /// sockets of the same component are never connected.
    pub fn connect(
        &mut self,
        component: ComponentId,
        from: impl Into<Endpoint>,
        to: impl Into<Endpoint>,
    ) -> Result<()> {
        self.connect_disconnect(component, from.into(), to.into(), Mode::Connect)
    }

    /// Removes a connection previously made with [`ComponentGraph::connect`]
    pub fn disconnect(
        &mut self,
        component: ComponentId,
        from: impl Into<Endpoint>,
        to: impl Into<Endpoint>,
    ) -> Result<()> {
        self.connect_disconnect(component, from.into(), to.into(), Mode::Disconnect)
    }

    fn resolve_endpoint(&self, component: ComponentId, endpoint: Endpoint, as_source: bool) -> Result<Resolved> {
        match endpoint {
            Endpoint::Space(space) => Ok(Resolved::Space(space)),
            Endpoint::SpaceSpec(spec) => Ok(Resolved::Space(Space::from_spec(&spec)?)),
            Endpoint::Component(other) => {
                let side = if as_source { SocketType::Out } else { SocketType::In };
                self.get_socket(other, SocketSpec::Only, Some(side)).map(Resolved::Socket)
            }
            Endpoint::Socket(spec) => self.get_socket(component, spec, None).map(Resolved::Socket),
        }
    }

    fn connect_disconnect(&mut self, component: ComponentId, from: Endpoint, to: Endpoint, mode: Mode) -> Result<()> {
        let from = self.resolve_endpoint(component, from, true)?;
        let to = self.resolve_endpoint(component, to, false)?;

        match (from, to) {
            (Resolved::Space(_), Resolved::Space(_)) => Err(GraphError::TypeMismatch(
                "cannot connect a Space to another Space".to_string(),
            )),
            (Resolved::Space(space), Resolved::Socket(socket)) => {
                if self.sock(socket).socket_type != SocketType::In {
                    return Err(GraphError::TypeMismatch(format!(
                        "Space {} can only be connected to an in-socket, but '{}' is an out-socket",
                        space,
                        self.sock(socket).name
                    )));
                }
                self.edit(socket, true, Connection::Space(space), mode)
            }
            (Resolved::Socket(socket), Resolved::Space(space)) => {
                if self.sock(socket).socket_type != SocketType::Out {
                    return Err(GraphError::TypeMismatch(format!(
                        "in-socket '{}' cannot be connected to Space {}",
                        self.sock(socket).name,
                        space
                    )));
                }
                self.edit(socket, false, Connection::Space(space), mode)
            }
            (Resolved::Socket(a), Resolved::Socket(b)) => {
                let (sa, sb) = (self.sock(a), self.sock(b));
                if sa.component == sb.component {
                    return Err(GraphError::SameComponentConnection(
                        sa.name.clone(),
                        sb.name.clone(),
                        self.comp(sa.component).name.clone(),
                    ));
                }
                if mode == Mode::Disconnect {
                    // Fail before touching either side.
                    let linked = sa.outgoing.contains(&Connection::Socket(b))
                        && sb.incoming.contains(&Connection::Socket(a));
                    if !linked {
                        return Err(GraphError::Configuration(format!(
                            "socket '{}' is not connected to socket '{}'",
                            sa.name, sb.name
                        )));
                    }
                }
                tracing::debug!(
                    from = %self.sock(a).name,
                    to = %self.sock(b).name,
                    connect = (mode == Mode::Connect),
                    "linking sockets"
                );
                self.edit(a, false, Connection::Socket(b), mode)?;
                self.edit(b, true, Connection::Socket(a), mode)
            }
        }
    }

    /// Appends to or removes from one connection list of `socket`
    fn edit(&mut self, socket: SocketId, incoming: bool, entry: Connection, mode: Mode) -> Result<()> {
        let s = self.sock_mut(socket);
        let list = if incoming { &mut s.incoming } else { &mut s.outgoing };
        match mode {
            Mode::Connect => {
                list.push(entry);
                Ok(())
            }
            Mode::Disconnect => match list.iter().position(|c| *c == entry) {
                Some(pos) => {
                    list.remove(pos);
                    Ok(())
                }
                None => Err(GraphError::Configuration(format!(
                    "socket '{}' has no connection {:?} to remove",
                    s.name, entry
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArrayBackend;
    use crate::component::ConnectSpec;
    use crate::config::ComponentConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (ComponentGraph, ComponentId, ComponentId, ComponentId) {
        let mut g = ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(0)));
        let root = g.create_component(ComponentConfig::new("root")).unwrap();
        let a = g.create_component(ComponentConfig::new("a")).unwrap();
        let b = g.create_component(ComponentConfig::new("b")).unwrap();
        g.add_sockets(a, ["input", "output"], None, false).unwrap();
        g.add_sockets(b, ["input", "output"], None, false).unwrap();
        g.add_component(root, a, ConnectSpec::None).unwrap();
        g.add_component(root, b, ConnectSpec::None).unwrap();
        (g, root, a, b)
    }

    #[test]
    fn test_connect_then_disconnect_restores_lists() {
        let (mut g, root, a, b) = setup();
        let a_out = g.get_output(a, None).unwrap();
        let b_in = g.get_input(b, None).unwrap();
        let before_out = g.socket(a_out).unwrap().outgoing_connections().to_vec();
        let before_in = g.socket(b_in).unwrap().incoming_connections().to_vec();

        g.connect(root, a, b).unwrap();
        assert_eq!(g.socket(a_out).unwrap().outgoing_connections(), &[Connection::Socket(b_in)]);
        assert_eq!(g.socket(b_in).unwrap().incoming_connections(), &[Connection::Socket(a_out)]);
        assert!(before_out.is_empty() && before_in.is_empty());

        g.disconnect(root, a_out, b_in).unwrap();
        assert_eq!(g.socket(a_out).unwrap().outgoing_connections(), before_out.as_slice());
        assert_eq!(g.socket(b_in).unwrap().incoming_connections(), before_in.as_slice());
    }

    #[test]
    fn test_space_to_out_socket_is_type_mismatch() {
        let (mut g, _, a, _) = setup();
        let err = g.connect(a, Space::float_box([2]), "output").unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch(_)));

        g.connect(a, Space::float_box([2]), "input").unwrap();
        let a_in = g.get_input(a, None).unwrap();
        assert_eq!(
            g.socket(a_in).unwrap().incoming_connections(),
            &[Connection::Space(Space::float_box([2]))]
        );
    }

    #[test]
    fn test_space_spec_and_sink() {
        let (mut g, _, a, _) = setup();
        g.connect(a, json!("int"), "input").unwrap();
        g.connect(a, "output", Space::bool_box(Vec::new())).unwrap();
        let a_out = g.get_output(a, None).unwrap();
        assert_eq!(g.socket(a_out).unwrap().outgoing_connections().len(), 1);

        let err = g.connect(a, "input", Space::bool_box(Vec::new())).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch(_)));
        let err = g.connect(a, Space::float_box([1]), Space::float_box([1])).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch(_)));
    }

    #[test]
    fn test_same_component_forbidden_both_ways() {
        let (mut g, _, a, _) = setup();
        let err = g.connect(a, "input", "output").unwrap_err();
        assert!(matches!(err, GraphError::SameComponentConnection(..)));
        let err = g.disconnect(a, "input", "output").unwrap_err();
        assert!(matches!(err, GraphError::SameComponentConnection(..)));
    }

    #[test]
    fn test_disconnect_unknown_link_leaves_state() {
        let (mut g, root, a, b) = setup();
        let err = g.disconnect(root, a, b).unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
        let a_out = g.get_output(a, None).unwrap();
        assert!(g.socket(a_out).unwrap().outgoing_connections().is_empty());
    }

    #[test]
    fn test_component_endpoint_needs_single_socket() {
        let (mut g, root, a, b) = setup();
        g.add_sockets(b, ["input2"], None, false).unwrap();
        let err = g.connect(root, a, b).unwrap_err();
        assert!(matches!(err, GraphError::AmbiguousSocket { count: 2, .. }));
    }
}
