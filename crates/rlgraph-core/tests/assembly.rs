//! End-to-end assembly scenarios

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use rlgraph_core::prelude::*;
use rlgraph_core::backend::TRAINABLE_VARIABLES;
use rlgraph_core::{Connection, Initializer, SpaceSource, VariableHook, VariableValue};
use std::collections::HashSet;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn graph() -> ComponentGraph {
    init_tracing();
    ComponentGraph::new(Arc::new(NdArrayBackend::with_seed(11)))
}

/// A dense-like layer: `input` -> `output`, weights created from the input space
fn dense(g: &mut ComponentGraph, scope: &str, units: usize) -> ComponentId {
    let id = g.create_component(ComponentConfig::new(scope)).unwrap();
    g.add_sockets(id, ["input", "output"], None, false).unwrap();
    g.register_method(
        id,
        ComputationMethod::new("apply", 1, 1, move |ctx, inputs| {
            ctx.variable("weights")?;
            let space = Space::float_box([units]).with_batch_rank();
            Ok(vec![ctx.op("matmul", &[&inputs[0]], space)])
        }),
    )
    .unwrap();
    g.add_computation(id, ["input"], ["output"], None, ComputationOptions::default())
        .unwrap();
    let hook: VariableHook = Arc::new(
        move |g: &mut ComponentGraph, c: ComponentId, spaces: &IndexMap<String, Space>| -> Result<()> {
            let in_units = spaces["input"].as_box().map_or(1, |b| b.shape.iter().product());
            g.get_variable(
                c,
                "weights",
                VariableSpec::with_shape([in_units, units]).initializer(Initializer::TruncatedNormal),
            )?;
            Ok(())
        },
    );
    g.set_variable_hook(id, hook).unwrap();
    id
}

fn connections(g: &ComponentGraph, socket: rlgraph_core::SocketId) -> (HashSet<String>, HashSet<String>) {
    let s = g.socket(socket).unwrap();
    let fmt = |c: &Connection| format!("{c:?}");
    (
        s.incoming_connections().iter().map(fmt).collect(),
        s.outgoing_connections().iter().map(fmt).collect(),
    )
}

#[test]
fn test_two_layer_stack_builds_bottom_up() {
    let mut g = graph();
    let net = g.create_component(ComponentConfig::new("net")).unwrap();
    let hidden = dense(&mut g, "hidden", 8);
    let out = dense(&mut g, "out", 2);
    g.add_component(net, hidden, ConnectSpec::Inputs).unwrap();
    g.add_component(net, out, ConnectSpec::Outputs).unwrap();
    g.connect(net, (hidden, "output"), (out, "input")).unwrap();
    g.connect(net, Space::float_box([4]).with_batch_rank(), "input").unwrap();

    let report = GraphBuilder::default().build(&mut g, net).unwrap();

    assert_eq!(report.completion_order(), &[net, hidden, out]);
    let output = g.get_output(net, None).unwrap();
    assert_eq!(report.space_of(output), Some(&Space::float_box([2]).with_batch_rank()));
    assert_eq!(report.ops().with_label("matmul").count(), 2);

    let weights = g.get_variable(out, "weights", VariableSpec::getter()).unwrap();
    let VariableValue::Single(w) = weights else {
        panic!("weights should be a single variable");
    };
    assert_eq!(w.name, "net/out/weights");
    assert_eq!(w.shape, vec![Some(8), Some(2)]);
    assert_eq!(g.read_variable(hidden, "weights", None).unwrap().shape(), &[4, 8]);

    let trainable = g.backend().collection(TRAINABLE_VARIABLES).unwrap();
    assert_eq!(trainable, vec!["net/hidden/weights".to_string(), "net/out/weights".to_string()]);
}

#[test]
fn test_connect_disconnect_round_trip_with_existing_links() {
    let mut g = graph();
    let root = g.create_component(ComponentConfig::new("root")).unwrap();
    let a = dense(&mut g, "a", 1);
    let b = dense(&mut g, "b", 1);
    let c = dense(&mut g, "c", 1);
    g.add_components(root, &[a, b, c], &rlgraph_core::ComponentsConnect::Nothing)
        .unwrap();
    g.connect(root, (c, "output"), (b, "input")).unwrap();

    let a_out = g.get_output(a, None).unwrap();
    let b_in = g.get_input(b, None).unwrap();
    let before = (connections(&g, a_out), connections(&g, b_in));
    g.connect(root, a_out, b_in).unwrap();
    assert_ne!((connections(&g, a_out), connections(&g, b_in)), before);
    g.disconnect(root, a_out, b_in).unwrap();
    assert_eq!((connections(&g, a_out), connections(&g, b_in)), before);
}

#[test]
fn test_copy_then_rewire_builds_independently() {
    let mut g = graph();
    let root = g.create_component(ComponentConfig::new("root")).unwrap();
    let original = dense(&mut g, "policy", 3);
    g.add_component(root, original, ConnectSpec::All).unwrap();
    g.connect(root, Space::float_box([5]).with_batch_rank(), "input").unwrap();

    let copy = g.copy(original, Some("target"), Some("target-policy")).unwrap();
    for &s in g.component(copy).unwrap().input_sockets() {
        assert!(g.socket(s).unwrap().incoming_connections().is_empty());
    }
    let original_in = g.get_input(original, None).unwrap();
    assert_eq!(g.socket(original_in).unwrap().incoming_connections().len(), 1);

    GraphBuilder::default().build(&mut g, root).unwrap();
    assert!(GraphBuilder::default().build(&mut g, copy).is_err());

    g.connect(copy, Space::float_box([5]).with_batch_rank(), "input").unwrap();
    GraphBuilder::default().build(&mut g, copy).unwrap();
    let copied = g.get_variable(copy, "weights", VariableSpec::getter()).unwrap();
    assert_eq!(copied.as_single().unwrap().name, "target-policy/weights");
    assert!(g.get_variable(original, "weights", VariableSpec::getter()).is_ok());
}

#[test]
fn test_json_space_endpoints_and_config() {
    let mut g = graph();
    let config = ComponentConfig::from_json(r#"{"scope": "preprocessor", "name": "pre-1"}"#).unwrap();
    let c = g.create_component(config).unwrap();
    g.add_sockets(c, ["input", "output"], None, false).unwrap();
    g.register_method(
        c,
        ComputationMethod::new("identity", 1, 1, |_, inputs| Ok(inputs.to_vec())),
    )
    .unwrap();
    g.add_computation(c, ["input"], ["output"], Some("identity"), ComputationOptions::default())
        .unwrap();
    let spec = serde_json::json!({"type": "tuple", "spaces": [
        {"type": "box", "dtype": "int", "shape": [], "num_categories": 3},
        "float"
    ]});
    assert!(g.connect(c, spec, "input").is_err());

    let spec = serde_json::json!({"type": "tuple", "spaces": [
        {"type": "box", "dtype": "int", "shape": [], "num_categories": 3},
        {"type": "box", "shape": [2]}
    ]});
    g.connect(c, spec, "input").unwrap();
    let report = GraphBuilder::default().build(&mut g, c).unwrap();
    let output = g.get_output(c, None).unwrap();
    let space = report.space_of(output).unwrap();
    assert_eq!(space.flatten().keys().cloned().collect::<Vec<_>>(), vec!["/[0]", "/[1]"]);
    assert_eq!(g.component(c).unwrap().name(), "pre-1");
}

#[test]
fn test_variables_from_socket_space_in_hook() {
    let mut g = graph();
    let memory = g.create_component(ComponentConfig::new("memory")).unwrap();
    g.define_inputs(memory, ["records"], None).unwrap();
    let hook: VariableHook = Arc::new(
        |g: &mut ComponentGraph, c: ComponentId, _: &IndexMap<String, Space>| -> Result<()> {
            g.get_variable(
                c,
                "buffer",
                VariableSpec::from_space(SpaceSource::Socket("records".to_string()))
                    .flatten(true)
                    .batch_rank(rlgraph_core::BatchRank::Fixed(16))
                    .trainable(false),
            )?;
            Ok(())
        },
    );
    g.set_variable_hook(memory, hook).unwrap();
    let records = Space::dict([
        ("states", Space::float_box([3]).with_batch_rank()),
        ("terminal", Space::bool_box(Vec::new()).with_batch_rank()),
    ]);
    g.connect(memory, records, "records").unwrap();
    GraphBuilder::default().build(&mut g, memory).unwrap();

    let vars = g.get_variables(memory, &[], None).unwrap();
    let VariableValue::Flat(buffer) = &vars["buffer"] else {
        panic!("buffer should be flattened");
    };
    assert_eq!(
        buffer.keys().cloned().collect::<Vec<_>>(),
        vec!["buffer/states".to_string(), "buffer/terminal".to_string()]
    );
    assert_eq!(buffer["buffer/states"].shape, vec![Some(16), Some(3)]);
    assert!(g.get_variables(memory, &[], Some(TRAINABLE_VARIABLES)).unwrap().is_empty());
}
