//! Composition behaviour: namespacing, boundary linking, validation and the
//! caches baked into composed assets.

use std::sync::Arc;

use blueprint_engine::{
    register_builtins, BlueprintConnection, BlueprintNode, BlueprintVariable, BoundaryPin,
    ComposeError, Composer, CompositionRequest, DataType, ExecutionResult, Fragment,
    FragmentRegistry, NodeTemplate, NodeTemplateRegistry, Pin, RawUnit, Value,
};

fn registries() -> (Arc<NodeTemplateRegistry>, Arc<FragmentRegistry>) {
    let mut templates = NodeTemplateRegistry::new();
    register_builtins(&mut templates).unwrap();
    templates
        .register_fn(
            NodeTemplate {
                template_id: "test/Name".to_string(),
                name: "Name".to_string(),
                category: "Test".to_string(),
                loop_construct: false,
                pins: vec![Pin::data_out("name", DataType::String)],
                description: None,
            },
            |ctx| {
                ctx.set_output("name", "fixed");
                ExecutionResult::Complete
            },
        )
        .unwrap();
    (Arc::new(templates), Arc::new(FragmentRegistry::new()))
}

fn composer_with_add_fragment() -> Composer {
    let (templates, fragments) = registries();
    let mut fragment = Fragment::new("math/add");
    fragment.nodes.push(
        BlueprintNode::new("adder", "core/Add")
            .with_override("a", 5.0)
            .with_override("b", 5.0),
    );
    fragment
        .boundary_pins
        .push(BoundaryPin::new("adder", "a", "in_a"));
    fragment
        .boundary_pins
        .push(BoundaryPin::new("adder", "b", "in_b"));
    fragment
        .boundary_pins
        .push(BoundaryPin::new("adder", "sum", "out_sum"));
    fragments.register(fragment).unwrap();
    Composer::new(templates, fragments)
}

fn entry_unit() -> RawUnit {
    RawUnit {
        nodes: vec![BlueprintNode::new("start", "core/Event")],
        boundary_pins: vec![BoundaryPin::new("start", "fired", "on_fired")],
        ..Default::default()
    }
}

fn chained_adds_request() -> CompositionRequest {
    CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "unit1")
        .fragment("math/add", "unit2")
        .link(("unit1", "out_sum"), ("unit2", "in_a"))
        .entry("main", "on_fired")
}

// ─────────────────────────────────────────────────────────────────────────────
// Merging & Namespacing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn fragments_are_namespaced_per_instance() {
    let composer = composer_with_add_fragment();
    let asset = composer.compose(&chained_adds_request()).unwrap();

    assert!(asset.node("unit1/adder").is_some());
    assert!(asset.node("unit2/adder").is_some());
    assert!(asset.node("main/start").is_some());
    assert_eq!(asset.entry_points, vec!["main/start".to_string()]);

    // The unit link landed on the remapped ids
    assert!(asset
        .connections
        .contains(&BlueprintConnection::new(
            "unit1/adder",
            "sum",
            "unit2/adder",
            "a"
        )));
}

#[test]
fn composition_is_deterministic() {
    let composer = composer_with_add_fragment();
    let request = chained_adds_request();
    let first = composer.compose(&request).unwrap();
    let second = composer.compose(&request).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn asset_serialization_round_trips() {
    let composer = composer_with_add_fragment();
    let asset = composer.compose(&chained_adds_request()).unwrap();
    let json = serde_json::to_string(&asset).unwrap();
    let back: blueprint_engine::BlueprintAsset = serde_json::from_str(&json).unwrap();
    assert_eq!(asset, back);
    assert_eq!(json, serde_json::to_string(&back).unwrap());
}

#[test]
fn duplicate_instance_tags_rejected() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "twice")
        .fragment("math/add", "twice")
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::DuplicateInstanceTag { tag }) if tag == "twice"
    ));
}

#[test]
fn unknown_fragment_rejected() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/missing", "unit1")
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::UnknownFragment { .. })
    ));
}

#[test]
fn unknown_template_rejected() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(BlueprintNode::new("ghost", "core/DoesNotExist"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::UnknownTemplate { template_id, .. }) if template_id == "core/DoesNotExist"
    ));
}

#[test]
fn unknown_boundary_rejected() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "unit1")
        .link(("unit1", "no_such_boundary"), ("unit1", "in_a"))
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::UnknownBoundary { name, .. }) if name == "no_such_boundary"
    ));
}

#[test]
fn entry_points_are_required() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new().raw("main", entry_unit());
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::NoEntryPoints)
    ));
}

#[test]
fn entry_point_must_be_a_control_output() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "unit1")
        .entry("unit1", "out_sum");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::BadEntryPoint { node_id, pin_id })
            if node_id == "unit1/adder" && pin_id == "sum"
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Variables
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn instance_variables_are_namespaced_and_private() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.variables
        .push(BlueprintVariable::instance("counter", DataType::Float, 0.0));
    unit.nodes.push(
        BlueprintNode::new("get", "core/GetVariable").with_override("variable", "counter"),
    );
    unit.connections
        .push(BlueprintConnection::new("get", "value", "sink", "a"));
    unit.nodes.push(BlueprintNode::new("sink", "core/Add"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    let asset = composer.compose(&request).unwrap();

    let var = asset.variable("main/counter").unwrap();
    assert_eq!(var.data_type, DataType::Float);
    assert!(asset.variable("counter").is_none());
    // The accessor override followed the rename
    assert_eq!(
        asset.node("main/get").unwrap().overrides.get("variable"),
        Some(&Value::from("main/counter"))
    );
}

#[test]
fn graph_variable_collision_rejected() {
    let composer = composer_with_add_fragment();
    let mut first = entry_unit();
    first
        .variables
        .push(BlueprintVariable::graph("threshold", DataType::Float, 1.0));
    let mut second = RawUnit::default();
    second
        .variables
        .push(BlueprintVariable::graph("threshold", DataType::Float, 2.0));
    let request = CompositionRequest::new()
        .raw("main", first)
        .raw("other", second)
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::VariableCollision { name, .. }) if name == "threshold"
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Validation
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn type_mismatch_rejected() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(BlueprintNode::new("name", "test/Name"));
    unit.boundary_pins
        .push(BoundaryPin::new("name", "name", "out_name"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .fragment("math/add", "unit1")
        .link(("main", "out_name"), ("unit1", "in_a"))
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::TypeMismatch { source_type, target_type, .. })
            if source_type == "String" && target_type == "Float"
    ));
}

#[test]
fn int_output_may_feed_float_input() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(
        BlueprintNode::new("loop", "core/ForLoop").with_override("count", 3i64),
    );
    unit.connections
        .push(BlueprintConnection::new("start", "fired", "loop", "run"));
    unit.boundary_pins
        .push(BoundaryPin::new("loop", "index", "out_index"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .fragment("math/add", "unit1")
        .link(("main", "out_index"), ("unit1", "in_a"))
        .entry("main", "on_fired");
    composer.compose(&request).unwrap();
}

#[test]
fn data_fan_in_rejected() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "unit1")
        .fragment("math/add", "unit2")
        .fragment("math/add", "unit3")
        .link(("unit1", "out_sum"), ("unit3", "in_a"))
        .link(("unit2", "out_sum"), ("unit3", "in_a"))
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::DataFanIn { node_id, pin_id })
            if node_id == "unit3/adder" && pin_id == "a"
    ));
}

#[test]
fn control_pin_cannot_feed_data_pin() {
    let composer = composer_with_add_fragment();
    let request = CompositionRequest::new()
        .raw("main", entry_unit())
        .fragment("math/add", "unit1")
        .link(("main", "on_fired"), ("unit1", "in_a"))
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::BadConnection { .. })
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Wildcards
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn wildcard_pins_resolve_and_are_cached() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(BlueprintNode::new("log", "core/Log"));
    unit.connections
        .push(BlueprintConnection::new("start", "fired", "log", "run"));
    unit.boundary_pins
        .push(BoundaryPin::new("log", "message", "in_message"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .fragment("math/add", "unit1")
        .link(("unit1", "out_sum"), ("main", "in_message"))
        .entry("main", "on_fired");
    let asset = composer.compose(&request).unwrap();
    assert_eq!(
        asset.wildcard_type("main/log", "message"),
        Some(&DataType::Float)
    );
}

#[test]
fn unconnected_wildcard_without_fallback_rejected() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    // Compare's wildcard inputs have no connection, override or default
    unit.nodes.push(BlueprintNode::new("cmp", "core/Compare"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::UnresolvedWildcard { node_id, .. }) if node_id == "main/cmp"
    ));
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycles & Loop Bodies
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn control_cycle_without_loop_construct_rejected() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes
        .push(BlueprintNode::new("a", "core/Log").with_override("message", "a"));
    unit.nodes
        .push(BlueprintNode::new("b", "core/Log").with_override("message", "b"));
    unit.connections
        .push(BlueprintConnection::new("start", "fired", "a", "run"));
    unit.connections
        .push(BlueprintConnection::new("a", "then", "b", "run"));
    unit.connections
        .push(BlueprintConnection::new("b", "then", "a", "run"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::ControlCycle { .. })
    ));
}

#[test]
fn control_cycle_through_loop_construct_allowed() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(
        BlueprintNode::new("loop", "core/ForLoop").with_override("count", 2i64),
    );
    unit.nodes
        .push(BlueprintNode::new("body", "core/Log").with_override("message", "tick"));
    unit.connections
        .push(BlueprintConnection::new("start", "fired", "loop", "run"));
    unit.connections
        .push(BlueprintConnection::new("loop", "body", "body", "run"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    let asset = composer.compose(&request).unwrap();
    assert!(asset
        .loop_body("main/loop")
        .contains(&"main/body".to_string()));
}

#[test]
fn static_data_cycle_rejected() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.nodes.push(BlueprintNode::new("a1", "core/Add"));
    unit.nodes.push(BlueprintNode::new("a2", "core/Add"));
    unit.connections
        .push(BlueprintConnection::new("a1", "sum", "a2", "a"));
    unit.connections
        .push(BlueprintConnection::new("a2", "sum", "a1", "a"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    assert!(matches!(
        composer.compose(&request),
        Err(ComposeError::DataCycle { .. })
    ));
}

#[test]
fn loop_body_includes_transitive_pure_producers() {
    let composer = composer_with_add_fragment();
    let mut unit = entry_unit();
    unit.variables
        .push(BlueprintVariable::instance("cnt", DataType::Float, 0.0));
    unit.nodes.push(
        BlueprintNode::new("loop", "core/ForLoop").with_override("count", 2i64),
    );
    unit.nodes
        .push(BlueprintNode::new("get", "core/GetVariable").with_override("variable", "cnt"));
    unit.nodes
        .push(BlueprintNode::new("bump", "core/Add").with_override("b", 1.0));
    unit.nodes
        .push(BlueprintNode::new("set", "core/SetVariable").with_override("variable", "cnt"));
    unit.connections
        .push(BlueprintConnection::new("start", "fired", "loop", "run"));
    unit.connections
        .push(BlueprintConnection::new("loop", "body", "set", "run"));
    unit.connections
        .push(BlueprintConnection::new("get", "value", "bump", "a"));
    unit.connections
        .push(BlueprintConnection::new("bump", "sum", "set", "value"));
    let request = CompositionRequest::new()
        .raw("main", unit)
        .entry("main", "on_fired");
    let asset = composer.compose(&request).unwrap();

    let body = asset.loop_body("main/loop");
    assert!(body.contains(&"main/set".to_string()));
    assert!(body.contains(&"main/bump".to_string()));
    assert!(body.contains(&"main/get".to_string()));
}
