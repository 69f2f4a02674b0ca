//! Sockets: named, typed ports on a component
//!
//! Lookups here are pure. Creating an internal socket on demand is the
//! separate, explicit [`ComponentGraph::ensure_internal_socket`].

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::graph::{ComponentGraph, ComponentId, ComputationId, SocketId};
use crate::spaces::Space;
use crate::{GraphError, Result};

lazy_static! {
    /// `input`/`output` as a token delimited by digits, underscores or word boundaries
    static ref SOCKET_TYPE_REGEX: Regex = Regex::new(r"([\d_]|\b)(in|out)put([\d_]|\b)").unwrap();
}

/// Direction of a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    /// Receives data
    In,
    /// Sends data
    Out,
}

impl SocketType {
    /// Infers the direction from a name such as `input`, `my_output` or `input2`
    #[must_use]
    pub fn infer(name: &str) -> Option<Self> {
        let captures = SOCKET_TYPE_REGEX.captures(name)?;
        match captures.get(2)?.as_str() {
            "in" => Some(Self::In),
            _ => Some(Self::Out),
        }
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In => write!(f, "in"),
            Self::Out => write!(f, "out"),
        }
    }
}

/// One entry of a socket's connection lists
#[derive(Debug, Clone, PartialEq)]
pub enum Connection {
    /// Another socket
    Socket(SocketId),
    /// A space bound directly to the socket
    Space(Space),
    /// A computation reading from or writing to the socket
    Computation(ComputationId),
}

/// A named port on a component
#[derive(Debug, Clone)]
pub struct Socket {
    pub(crate) id: SocketId,
    pub(crate) name: String,
    pub(crate) socket_type: SocketType,
    pub(crate) internal: bool,
    pub(crate) component: ComponentId,
    pub(crate) incoming: Vec<Connection>,
    pub(crate) outgoing: Vec<Connection>,
    pub(crate) space: Option<Space>,
}

impl Socket {
    /// Id of this socket
    #[must_use]
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Name, unique within the owning component
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction
    #[must_use]
    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    /// Whether this socket is internal (not exposed)
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Owning component
    #[must_use]
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// Ordered incoming connections
    #[must_use]
    pub fn incoming_connections(&self) -> &[Connection] {
        &self.incoming
    }

    /// Ordered outgoing connections
    #[must_use]
    pub fn outgoing_connections(&self) -> &[Connection] {
        &self.outgoing
    }

    /// Space resolved by the last build, if any
    #[must_use]
    pub fn space(&self) -> Option<&Space> {
        self.space.as_ref()
    }
}

/// Ways to name a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSpec {
    /// The sole socket of the requested side
    Only,
    /// A socket of the component doing the lookup
    Named(String),
    /// A socket of another component
    Foreign(ComponentId, String),
    /// An already resolved socket
    Id(SocketId),
}

impl From<&str> for SocketSpec {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for SocketSpec {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<SocketId> for SocketSpec {
    fn from(id: SocketId) -> Self {
        Self::Id(id)
    }
}

impl From<(ComponentId, &str)> for SocketSpec {
    fn from((component, name): (ComponentId, &str)) -> Self {
        Self::Foreign(component, name.to_string())
    }
}

fn side(socket_type: Option<SocketType>) -> String {
    socket_type.map_or_else(|| "??".to_string(), |t| t.to_string())
}

impl ComponentGraph {
    /// Adds sockets named `names` to `component`.
    ///
    /// Without an explicit type, each name must carry an `input`/`output`
    /// token. Names must be unique across the component's in, out and
    /// internal sockets.
    pub fn add_sockets<I, S>(
        &mut self,
        component: ComponentId,
        names: I,
        socket_type: Option<SocketType>,
        internal: bool,
    ) -> Result<Vec<SocketId>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let owner = self.component(component)?;
        let mut taken: Vec<String> = owner
            .all_sockets()
            .map(|s| self.sock(s).name.clone())
            .collect();
        let owner_name = owner.name.clone();

        let mut planned = Vec::new();
        for name in names {
            let name = name.as_ref();
            let ty = match socket_type {
                Some(ty) => ty,
                None => SocketType::infer(name)
                    .ok_or_else(|| GraphError::NameInference(name.to_string()))?,
            };
            if taken.iter().any(|t| t == name) {
                return Err(GraphError::DuplicateSocket {
                    component: owner_name,
                    socket: name.to_string(),
                });
            }
            taken.push(name.to_string());
            planned.push((name.to_string(), ty));
        }

        let mut ids = Vec::with_capacity(planned.len());
        for (name, ty) in planned {
            let id = SocketId(self.sockets.len());
            tracing::debug!(component = %owner_name, socket = %name, socket_type = %ty, internal, "adding socket");
            self.sockets.push(Socket {
                id,
                name,
                socket_type: ty,
                internal,
                component,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                space: None,
            });
            let owner = self.comp_mut(component);
            if internal {
                owner.internal_sockets.push(id);
            } else if ty == SocketType::In {
                owner.input_sockets.push(id);
            } else {
                owner.output_sockets.push(id);
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Adds in-sockets and, if given, connects `space` to each of them
    pub fn define_inputs<I, S>(
        &mut self,
        component: ComponentId,
        names: I,
        space: Option<Space>,
    ) -> Result<Vec<SocketId>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ids = self.add_sockets(component, names, Some(SocketType::In), false)?;
        if let Some(space) = space {
            for &id in &ids {
                self.connect(component, space.clone(), id)?;
            }
        }
        Ok(ids)
    }

    /// Adds out-sockets
    pub fn define_outputs<I, S>(&mut self, component: ComponentId, names: I) -> Result<Vec<SocketId>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_sockets(component, names, Some(SocketType::Out), false)
    }

    /// Resolves a socket spec in the namespace of `component`
    pub fn get_socket(
        &self,
        component: ComponentId,
        spec: impl Into<SocketSpec>,
        socket_type: Option<SocketType>,
    ) -> Result<SocketId> {
        let owner = self.component(component)?;
        let (target, name) = match spec.into() {
            SocketSpec::Only => {
                let candidates = match socket_type {
                    Some(SocketType::In) => &owner.input_sockets,
                    Some(SocketType::Out) => &owner.output_sockets,
                    None => {
                        return Err(GraphError::AmbiguousSocket {
                            component: owner.name.clone(),
                            side: side(None),
                            count: owner.input_sockets.len() + owner.output_sockets.len(),
                        })
                    }
                };
                return match candidates.as_slice() {
                    [only] => Ok(*only),
                    _ => Err(GraphError::AmbiguousSocket {
                        component: owner.name.clone(),
                        side: side(socket_type),
                        count: candidates.len(),
                    }),
                };
            }
            SocketSpec::Id(id) => {
                return match self.socket(id) {
                    Some(_) => Ok(id),
                    None => Err(GraphError::SocketNotFound {
                        component: owner.name.clone(),
                        socket: id.to_string(),
                        side: side(socket_type),
                    }),
                };
            }
            SocketSpec::Named(name) => (component, name),
            SocketSpec::Foreign(other, name) => (other, name),
        };

        match self.get_socket_by_name(target, &name, socket_type)? {
            Some(id) => Ok(id),
            None => Err(GraphError::SocketNotFound {
                component: self.component(target)?.name.clone(),
                socket: name,
                side: side(socket_type),
            }),
        }
    }

    /// The in-socket `name`, or the only in-socket when `name` is `None`
    pub fn get_input(&self, component: ComponentId, name: Option<&str>) -> Result<SocketId> {
        let spec = name.map_or(SocketSpec::Only, SocketSpec::from);
        self.get_socket(component, spec, Some(SocketType::In))
    }

    /// The out-socket `name`, or the only out-socket when `name` is `None`
    pub fn get_output(&self, component: ComponentId, name: Option<&str>) -> Result<SocketId> {
        let spec = name.map_or(SocketSpec::Only, SocketSpec::from);
        self.get_socket(component, spec, Some(SocketType::Out))
    }

    /// Finds a socket of `component` by name.
    ///
    /// With `None` the out and internal sockets are searched before the in
    /// sockets. `In` searches in and internal sockets, `Out` searches out and
    /// internal sockets.
    pub fn get_socket_by_name(
        &self,
        component: ComponentId,
        name: &str,
        socket_type: Option<SocketType>,
    ) -> Result<Option<SocketId>> {
        let owner = self.component(component)?;
        let find = |ids: &[SocketId]| ids.iter().copied().find(|s| self.sock(*s).name == name);
        let found = match socket_type {
            Some(SocketType::In) => find(&owner.input_sockets).or_else(|| find(&owner.internal_sockets)),
            Some(SocketType::Out) => find(&owner.output_sockets).or_else(|| find(&owner.internal_sockets)),
            None => find(&owner.output_sockets)
                .or_else(|| find(&owner.internal_sockets))
                .or_else(|| find(&owner.input_sockets)),
        };
        Ok(found)
    }

    /// Returns the socket `name` of `component`, creating an internal
    /// in-socket of that name if none exists.
    pub fn ensure_internal_socket(&mut self, component: ComponentId, name: &str) -> Result<SocketId> {
        if let Some(id) = self.get_socket_by_name(component, name, None)? {
            return Ok(id);
        }
        let ids = self.add_sockets(component, [name], Some(SocketType::In), true)?;
        Ok(ids[0])
    }
}
