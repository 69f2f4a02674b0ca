//! Build driver: propagates spaces through a component tree and fires computations
//!
//! Building starts from every space bound to a socket, creates a placeholder
//! op for it and pushes ops along socket links. A socket takes the space of
//! the first op reaching it. Once all in-sockets of a component carry a
//! space the component is input-complete: its variable hook runs (once per
//! component, across builds) and its computations may fire. A computation
//! fires once for every combination of input ops it has not seen yet.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;

use crate::config::BuildConfig;
use crate::graph::{ComponentGraph, ComponentId, ComputationId, SocketId};
use crate::ops::{DataOp, OpContext, OpId, OpLog};
use crate::socket::{Connection, SocketType};
use crate::spaces::Space;
use crate::{GraphError, Result};

/// Builds component graphs
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: BuildConfig,
}

/// Outcome of [`GraphBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    ops: OpLog,
    socket_ops: HashMap<SocketId, Vec<DataOp>>,
    completed: Vec<ComponentId>,
    incomplete: Vec<ComponentId>,
}

impl BuildReport {
    /// Every op created during the build
    pub fn ops(&self) -> &OpLog {
        &self.ops
    }

    /// Ops that reached `socket`, in arrival order
    pub fn ops_at(&self, socket: SocketId) -> &[DataOp] {
        self.socket_ops.get(&socket).map_or(&[], Vec::as_slice)
    }

    /// Space resolved for `socket`
    pub fn space_of(&self, socket: SocketId) -> Option<&Space> {
        self.ops_at(socket).first().map(DataOp::space)
    }

    /// Components in the order they became input-complete
    pub fn completion_order(&self) -> &[ComponentId] {
        &self.completed
    }

    /// Components left without spaces on some in-socket
    pub fn incomplete(&self) -> &[ComponentId] {
        &self.incomplete
    }
}

impl GraphBuilder {
    /// Builder with the given configuration
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// Builds the subtree rooted at `root`.
    ///
    /// Resets socket spaces and completeness of the subtree first, so a tree
    /// may be rebuilt after rewiring. Variable hooks that already ran do
    /// not run again.
    pub fn build(&self, graph: &mut ComponentGraph, root: ComponentId) -> Result<BuildReport> {
        let members = graph.subtree(root)?;
        tracing::info!(
            root = %graph.comp(root).name,
            components = members.len(),
            backend = ?graph.backend.kind(),
            "building component graph"
        );

        for &member in &members {
            let sockets: Vec<SocketId> = graph.comp(member).all_sockets().collect();
            for socket in sockets {
                graph.sock_mut(socket).space = None;
            }
            let component = graph.comp_mut(member);
            component.input_complete = false;
            component.sockets_to_do_later.clear();
        }

        let mut state = BuildState {
            graph,
            log: OpLog::default(),
            socket_ops: HashMap::new(),
            queue: VecDeque::new(),
            fired: HashSet::new(),
            completed: Vec::new(),
        };

        for &member in &members {
            let sockets: Vec<SocketId> = state.graph.comp(member).all_sockets().collect();
            for socket in sockets {
                let spaces: Vec<Space> = state
                    .graph
                    .sock(socket)
                    .incoming
                    .iter()
                    .filter_map(|c| match c {
                        Connection::Space(space) => Some(space.clone()),
                        _ => None,
                    })
                    .collect();
                for space in spaces {
                    let op = state.log.push("placeholder", Some(member), Vec::new(), space);
                    state.deliver(socket, op)?;
                }
            }
        }
        for &member in &members {
            state.check_complete(member)?;
        }
        while let Some((socket, op)) = state.queue.pop_front() {
            state.process(socket, &op)?;
        }

        let incomplete: Vec<ComponentId> = members
            .iter()
            .copied()
            .filter(|&m| !state.graph.comp(m).input_complete)
            .collect();
        if !incomplete.is_empty() {
            let names: Vec<String> = incomplete
                .iter()
                .map(|&m| state.graph.comp(m).name.clone())
                .collect();
            if !self.config.allow_incomplete {
                return Err(GraphError::IncompleteBuild(names));
            }
            tracing::warn!(components = ?names, "components not input-complete after build");
        }
        tracing::info!(
            ops = state.log.len(),
            completed = state.completed.len(),
            "component graph built"
        );

        Ok(BuildReport {
            ops: state.log,
            socket_ops: state.socket_ops,
            completed: state.completed,
            incomplete,
        })
    }
}

struct BuildState<'g> {
    graph: &'g mut ComponentGraph,
    log: OpLog,
    socket_ops: HashMap<SocketId, Vec<DataOp>>,
    queue: VecDeque<(SocketId, DataOp)>,
    fired: HashSet<(ComputationId, Vec<OpId>)>,
    completed: Vec<ComponentId>,
}

impl BuildState<'_> {
    /// Records `op` at `socket` unless it is already there
    fn deliver(&mut self, socket: SocketId, op: DataOp) -> Result<()> {
        let ops = self.socket_ops.entry(socket).or_default();
        if ops.iter().any(|o| o.id() == op.id()) {
            return Ok(());
        }
        ops.push(op.clone());

        let s = self.graph.sock_mut(socket);
        let first = s.space.is_none();
        if first {
            s.space = Some(op.space().clone());
        }
        let (component, counts) = (s.component, s.socket_type == SocketType::In && !s.internal);
        tracing::trace!(socket = %s.name, op = %op.id(), "op reached socket");
        self.queue.push_back((socket, op));
        if first && counts {
            self.check_complete(component)?;
        }
        Ok(())
    }

    fn process(&mut self, socket: SocketId, op: &DataOp) -> Result<()> {
        let outgoing = self.graph.sock(socket).outgoing.clone();
        for connection in outgoing {
            match connection {
                Connection::Socket(target) => self.deliver(target, op.clone())?,
                Connection::Computation(c) => {
                    let owner = self.graph.computations[c.index()].component;
                    if self.graph.comp(owner).input_complete {
                        self.try_fire(c)?;
                    } else {
                        let later = &mut self.graph.comp_mut(owner).sockets_to_do_later;
                        if !later.contains(&socket) {
                            later.push(socket);
                        }
                    }
                }
                Connection::Space(_) => {}
            }
        }
        Ok(())
    }

    fn check_complete(&mut self, component: ComponentId) -> Result<()> {
        let c = self.graph.comp(component);
        if c.input_complete || c.input_sockets.iter().any(|&s| self.graph.sock(s).space.is_none()) {
            return Ok(());
        }
        let spaces: IndexMap<String, Space> = c
            .input_sockets
            .iter()
            .filter_map(|&s| {
                let socket = self.graph.sock(s);
                socket.space.clone().map(|space| (socket.name.clone(), space))
            })
            .collect();
        tracing::info!(component = %c.name, "component is input-complete");

        let c = self.graph.comp_mut(component);
        c.input_complete = true;
        let hook = if c.variables_created {
            None
        } else {
            c.variable_hook.clone()
        };
        self.completed.push(component);
        if let Some(hook) = hook {
            hook(&mut *self.graph, component, &spaces)?;
        }
        self.graph.comp_mut(component).variables_created = true;

        let deferred = mem::take(&mut self.graph.comp_mut(component).sockets_to_do_later);
        for socket in deferred {
            let outgoing = self.graph.sock(socket).outgoing.clone();
            for connection in outgoing {
                if let Connection::Computation(c) = connection {
                    self.try_fire(c)?;
                }
            }
        }
        let no_input = self.graph.comp(component).no_input_computations.clone();
        for c in no_input {
            self.try_fire(c)?;
        }
        Ok(())
    }

    /// Fires `computation` for every unseen combination of input ops
    fn try_fire(&mut self, computation: ComputationId) -> Result<()> {
        let inputs = self.graph.computations[computation.index()].input_sockets.clone();
        let lists: Vec<Vec<DataOp>> = inputs
            .iter()
            .map(|s| self.socket_ops.get(s).cloned().unwrap_or_default())
            .collect();
        for combination in combinations(&lists) {
            let key = (computation, combination.iter().map(DataOp::id).collect::<Vec<_>>());
            if !self.fired.insert(key) {
                continue;
            }
            let outputs = self.run(computation, &combination)?;
            let sockets = self.graph.computations[computation.index()].output_sockets.clone();
            for (socket, op) in sockets.into_iter().zip(outputs) {
                self.deliver(socket, op)?;
            }
        }
        Ok(())
    }

    fn run(&mut self, computation: ComputationId, inputs: &[DataOp]) -> Result<Vec<DataOp>> {
        let record = &self.graph.computations[computation.index()];
        let (component, flags) = (record.component, record.flags);
        let owner = self.graph.comp(component);
        let method = owner.methods.get(&record.method).cloned().ok_or_else(|| {
            GraphError::Computation(format!(
                "method '{}' not registered on '{}'",
                record.method, owner.name
            ))
        })?;
        tracing::debug!(component = %owner.name, method = %method.name(), "firing computation");

        let split = flags.flatten_ops && flags.split_ops && inputs.iter().any(|op| op.space().is_container());
        if !split {
            let key = flags.add_auto_key_as_first_param.then(String::new);
            let mut ctx = OpContext {
                log: &mut self.log,
                graph: &*self.graph,
                component,
                key,
            };
            return method.call(&mut ctx, inputs);
        }

        let flat_inputs: Vec<Option<IndexMap<String, Space>>> = inputs
            .iter()
            .map(|op| op.space().is_container().then(|| op.space().flatten()))
            .collect();
        let keys: Vec<String> = flat_inputs
            .iter()
            .flatten()
            .next()
            .map(|flat| flat.keys().cloned().collect())
            .unwrap_or_default();

        let mut per_key: Vec<(String, Vec<DataOp>)> = Vec::with_capacity(keys.len());
        for key in keys {
            let mut args = Vec::with_capacity(inputs.len());
            for (op, flat) in inputs.iter().zip(&flat_inputs) {
                match flat {
                    None => args.push(op.clone()),
                    Some(flat) => {
                        let space = flat.get(&key).cloned().ok_or_else(|| {
                            GraphError::Computation(format!(
                                "container input {} has no key '{key}' to split on",
                                op.space()
                            ))
                        })?;
                        args.push(self.log.push(format!("split{key}"), Some(component), vec![op.id()], space));
                    }
                }
            }
            let mut ctx = OpContext {
                log: &mut self.log,
                graph: &*self.graph,
                component,
                key: flags.add_auto_key_as_first_param.then(|| key.clone()),
            };
            let outputs = method.call(&mut ctx, &args)?;
            per_key.push((key, outputs));
        }

        let mut merged = Vec::with_capacity(method.num_outputs());
        for j in 0..method.num_outputs() {
            let parts: IndexMap<String, Space> = per_key
                .iter()
                .map(|(key, outputs)| (key.clone(), outputs[j].space().clone()))
                .collect();
            let ids = per_key.iter().map(|(_, outputs)| outputs[j].id()).collect();
            let (label, space) = if flags.unflatten_ops {
                ("unflatten", Space::unflatten(&parts)?)
            } else {
                ("flat", Space::Dict { spaces: parts })
            };
            merged.push(self.log.push(label, Some(component), ids, space));
        }
        Ok(merged)
    }
}

/// Cartesian product of `lists`; a single empty combination for no lists
fn combinations(lists: &[Vec<DataOp>]) -> Vec<Vec<DataOp>> {
    lists.iter().fold(vec![Vec::new()], |acc, list| {
        acc.iter()
            .flat_map(|prefix| {
                list.iter().map(move |op| {
                    let mut next = prefix.clone();
                    next.push(op.clone());
                    next
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NdArrayBackend;
    use crate::component::ConnectSpec;
    use crate::computation::{ComputationMethod, ComputationOptions};
    use crate::config::ComponentConfig;
    use crate::variables::{SpaceSource, VariableHook, VariableSpec};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn graph() -> ComponentGraph {
        ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(1)))
    }

    fn double() -> ComputationMethod {
        ComputationMethod::new("double", 1, 1, |ctx, inputs| {
            Ok(vec![ctx.op("double", &[&inputs[0]], inputs[0].space().clone())])
        })
    }

    #[test]
    fn test_combinations() {
        let mut log = OpLog::default();
        let a = log.push("a", None, vec![], Space::float_box([1]));
        let b = log.push("b", None, vec![], Space::float_box([1]));
        let c = log.push("c", None, vec![], Space::float_box([1]));
        assert_eq!(combinations(&[]).len(), 1);
        assert_eq!(combinations(&[vec![a.clone(), b], vec![c]]).len(), 2);
        assert!(combinations(&[vec![a], vec![]]).is_empty());
    }

    #[test]
    fn test_spaces_propagate_and_hook_runs_once() {
        let mut g = graph();
        let root = g.create_component(ComponentConfig::new("root")).unwrap();
        let dense = g.create_component(ComponentConfig::new("dense")).unwrap();
        g.add_sockets(dense, ["input", "output"], None, false).unwrap();
        g.register_method(dense, double()).unwrap();
        g.add_computation(dense, ["input"], ["output"], None, ComputationOptions::default())
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: VariableHook = Arc::new(
            move |g: &mut ComponentGraph, c: ComponentId, spaces: &IndexMap<String, Space>| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(spaces["input"], Space::float_box([3]));
                g.get_variable(c, "weights", VariableSpec::from_space(SpaceSource::Socket("input".into())))?;
                Ok(())
            },
        );
        g.set_variable_hook(dense, hook).unwrap();
        g.add_component(root, dense, ConnectSpec::All).unwrap();
        g.connect(root, Space::float_box([3]), "input").unwrap();

        let report = GraphBuilder::default().build(&mut g, root).unwrap();
        let out = g.get_output(root, None).unwrap();
        assert_eq!(report.space_of(out), Some(&Space::float_box([3])));
        assert_eq!(g.socket(out).unwrap().space(), Some(&Space::float_box([3])));
        assert_eq!(report.ops().with_label("double").count(), 1);
        assert_eq!(report.completion_order(), &[root, dense]);
        assert!(g.component(dense).unwrap().is_input_complete());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(g.component(dense).unwrap().variables().contains_key("weights"));

        GraphBuilder::default().build(&mut g, root).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_hook_runs_again_on_rebuild() {
        let mut g = graph();
        let dense = g.create_component(ComponentConfig::new("dense")).unwrap();
        g.define_inputs(dense, ["input"], None).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: VariableHook = Arc::new(
            move |g: &mut ComponentGraph, c: ComponentId, spaces: &IndexMap<String, Space>| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                if !spaces["input"].has_batch_rank() {
                    return Err(GraphError::Configuration("input needs a batch rank".to_string()));
                }
                g.get_variable(c, "weights", VariableSpec::with_shape([2]))?;
                Ok(())
            },
        );
        g.set_variable_hook(dense, hook).unwrap();
        g.connect(dense, Space::float_box([2]), "input").unwrap();

        for attempt in 1..=2 {
            let err = GraphBuilder::default().build(&mut g, dense).unwrap_err();
            assert!(matches!(err, GraphError::Configuration(_)));
            assert_eq!(calls.load(Ordering::SeqCst), attempt);
        }
        assert!(g.component(dense).unwrap().variables().is_empty());

        g.disconnect(dense, Space::float_box([2]), "input").unwrap();
        g.connect(dense, Space::float_box([2]).with_batch_rank(), "input").unwrap();
        GraphBuilder::default().build(&mut g, dense).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(g.component(dense).unwrap().variables().contains_key("weights"));

        GraphBuilder::default().build(&mut g, dense).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_incomplete_build() {
        let mut g = graph();
        let root = g.create_component(ComponentConfig::new("root")).unwrap();
        g.add_sockets(root, ["input"], None, false).unwrap();
        let err = GraphBuilder::default().build(&mut g, root).unwrap_err();
        assert!(matches!(err, GraphError::IncompleteBuild(names) if names == vec!["root".to_string()]));

        let report = GraphBuilder::new(BuildConfig { allow_incomplete: true })
            .build(&mut g, root)
            .unwrap();
        assert_eq!(report.incomplete(), &[root]);
    }

    #[test]
    fn test_split_and_unflatten_container_inputs() {
        let mut g = graph();
        let c = g.create_component(ComponentConfig::new("c")).unwrap();
        g.add_sockets(c, ["input", "output"], None, false).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let keys = Arc::clone(&seen);
        g.register_method(
            c,
            ComputationMethod::new("double", 1, 1, move |ctx, inputs| {
                keys.lock().unwrap().push(ctx.key().map(str::to_string));
                Ok(vec![ctx.op("double", &[&inputs[0]], inputs[0].space().clone())])
            }),
        )
        .unwrap();
        let options = ComputationOptions::default()
            .split_ops(true)
            .add_auto_key_as_first_param(true);
        g.add_computation(c, ["input"], ["output"], None, options).unwrap();

        let space = Space::dict([("a", Space::float_box([2])), ("b", Space::bool_box(vec![]))]);
        g.connect(c, space.clone(), "input").unwrap();
        let report = GraphBuilder::default().build(&mut g, c).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some("/a".to_string()), Some("/b".to_string())]
        );
        let out = g.get_output(c, None).unwrap();
        assert_eq!(report.space_of(out), Some(&space));
        assert_eq!(report.ops().with_label("unflatten").count(), 1);
        assert_eq!(report.ops().with_label("split/a").count(), 1);
    }

    #[test]
    fn test_no_input_computation_fires_on_completion() {
        let mut g = graph();
        let c = g.create_component(ComponentConfig::new("timer")).unwrap();
        g.define_outputs(c, ["output"]).unwrap();
        g.register_method(
            c,
            ComputationMethod::new("constant", 0, 1, |ctx, _| {
                Ok(vec![ctx.op("constant", &[], Space::int_box(1000, vec![]))])
            }),
        )
        .unwrap();
        g.add_computation(c, Vec::<&str>::new(), ["output"], None, ComputationOptions::default())
            .unwrap();

        let report = GraphBuilder::default().build(&mut g, c).unwrap();
        assert_eq!(report.ops().with_label("constant").count(), 1);
        let out = g.get_output(c, None).unwrap();
        assert_eq!(report.ops_at(out).len(), 1);
    }

    #[test]
    fn test_computation_waits_for_all_inputs() {
        let mut g = graph();
        let c = g.create_component(ComponentConfig::new("add")).unwrap();
        g.add_sockets(c, ["input_a", "input_b", "output"], None, false).unwrap();
        g.register_method(
            c,
            ComputationMethod::new("add", 2, 1, |ctx, inputs| {
                Ok(vec![ctx.op("add", &[&inputs[0], &inputs[1]], inputs[0].space().clone())])
            }),
        )
        .unwrap();
        g.add_computation(c, ["input_a"], ["output"], None, ComputationOptions::default())
            .unwrap_err();
        g.add_computation(c, ["input_a", "input_b"], ["output"], None, ComputationOptions::default())
            .unwrap();
        g.connect(c, Space::float_box([1]), "input_a").unwrap();
        g.connect(c, Space::float_box([1]), "input_b").unwrap();

        let report = GraphBuilder::default().build(&mut g, c).unwrap();
        let add = report.ops().with_label("add").next().unwrap();
        assert_eq!(add.inputs.len(), 2);
        assert_eq!(report.ops().with_label("add").count(), 1);
    }
}
