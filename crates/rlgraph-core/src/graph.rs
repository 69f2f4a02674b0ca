//! Arena holding every component, socket and computation of one graph
//!
//! Components form a tree through parent links and `sub_components` maps.
//! Sockets and computations belong to exactly one component and refer to
//! their peers by id only, so connections never own anything.

use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::component::Component;
use crate::computation::Computation;
use crate::socket::Socket;
use crate::{GraphError, Result};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            /// Raw arena index
            #[must_use]
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to a component in a [`ComponentGraph`]
    ComponentId
);
arena_id!(
    /// Handle to a socket in a [`ComponentGraph`]
    SocketId
);
arena_id!(
    /// Handle to a computation in a [`ComponentGraph`]
    ComputationId
);

/// Owner of all graph-assembly state
pub struct ComponentGraph {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) components: Vec<Component>,
    pub(crate) sockets: Vec<Socket>,
    pub(crate) computations: Vec<Computation>,
}

impl fmt::Debug for ComponentGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentGraph")
            .field("backend", &self.backend.kind())
            .field("components", &self.components.len())
            .field("sockets", &self.sockets.len())
            .field("computations", &self.computations.len())
            .finish()
    }
}

impl ComponentGraph {
    /// Create an empty graph building against `backend`
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            components: Vec::new(),
            sockets: Vec::new(),
            computations: Vec::new(),
        }
    }

    /// The backend capability of this graph
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Look up a component
    pub fn component(&self, id: ComponentId) -> Result<&Component> {
        self.components
            .get(id.0)
            .ok_or(GraphError::ComponentNotFound(id.0))
    }

    pub(crate) fn component_mut(&mut self, id: ComponentId) -> Result<&mut Component> {
        self.components
            .get_mut(id.0)
            .ok_or(GraphError::ComponentNotFound(id.0))
    }

    /// Look up a socket
    #[must_use]
    pub fn socket(&self, id: SocketId) -> Option<&Socket> {
        self.sockets.get(id.0)
    }

    /// Look up a computation
    #[must_use]
    pub fn computation(&self, id: ComputationId) -> Option<&Computation> {
        self.computations.get(id.0)
    }

    // Ids handed out by this graph always index into the arenas.
    pub(crate) fn sock(&self, id: SocketId) -> &Socket {
        &self.sockets[id.0]
    }

    pub(crate) fn sock_mut(&mut self, id: SocketId) -> &mut Socket {
        &mut self.sockets[id.0]
    }

    pub(crate) fn comp(&self, id: ComponentId) -> &Component {
        &self.components[id.0]
    }

    pub(crate) fn comp_mut(&mut self, id: ComponentId) -> &mut Component {
        &mut self.components[id.0]
    }

    /// All component ids, in creation order
    pub fn component_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        (0..self.components.len()).map(ComponentId)
    }

    /// `id` and every component below it, parents before children
    pub fn subtree(&self, id: ComponentId) -> Result<Vec<ComponentId>> {
        self.component(id)?;
        let mut order = vec![id];
        let mut i = 0;
        while i < order.len() {
            order.extend(self.comp(order[i]).sub_components.values().copied());
            i += 1;
        }
        Ok(order)
    }

    /// Slash-joined scopes from the root down to `id`, skipping empty scopes
    pub fn full_scope(&self, id: ComponentId) -> Result<String> {
        let mut scopes = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let component = self.component(c)?;
            if !component.scope.is_empty() {
                scopes.push(component.scope.as_str());
            }
            current = component.parent;
        }
        scopes.reverse();
        Ok(scopes.join("/"))
    }

    /// Human-readable summary of a component, e.g. `Component('dense' in=[input] out=[output])`
    pub fn describe(&self, id: ComponentId) -> Result<String> {
        let component = self.component(id)?;
        let names = |ids: &[SocketId]| {
            ids.iter()
                .map(|s| self.sock(*s).name.clone())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Ok(format!(
            "Component('{}' in=[{}] out=[{}])",
            component.name,
            names(&component.input_sockets),
            names(&component.output_sockets)
        ))
    }
}
