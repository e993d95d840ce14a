//! Structural composition: merging fragments and raw graph pieces into one
//! validated, executable [`BlueprintAsset`].
//!
//! Composition is deterministic (the same request always yields a
//! byte-identical asset) and all-or-nothing: any validation failure returns a
//! [`ComposeError`] and no asset exists in a half-merged state.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use blueprint_graph::{
    pin_key, BlueprintAsset, BlueprintConnection, BlueprintNode, BlueprintVariable, BoundaryPin,
    CoercionTable, DataType, NodeTemplate, Pin, PinDirection, PinKind, Value, VariableScope,
};

use crate::error::ComposeError;
use crate::fragments::FragmentRegistry;
use crate::registry::NodeTemplateRegistry;

/// Override key whose value names a blueprint variable. The composer rewrites
/// it when the unit's instance variables are namespaced, so variable-accessor
/// nodes keep pointing at their own unit's variable after the merge.
pub const VARIABLE_OVERRIDE_KEY: &str = "variable";

/// Control output a loop construct re-enqueues each iteration
pub const LOOP_BODY_PIN: &str = "body";

// ─────────────────────────────────────────────────────────────────────────────
// Composition Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Reference to an exposed boundary pin of one composition unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRef {
    /// Instance tag of the unit (explicit, or `unitN` for the N-th untagged unit)
    pub unit: String,
    /// Exposed boundary name inside that unit
    pub name: String,
}

impl BoundaryRef {
    pub fn new(unit: &str, name: &str) -> Self {
        Self {
            unit: unit.to_string(),
            name: name.to_string(),
        }
    }
}

/// A directed connection between boundary pins of two units
#[derive(Debug, Clone)]
pub struct UnitLink {
    pub source: BoundaryRef,
    pub target: BoundaryRef,
}

/// Nodes contributed directly by the composing context, with the same
/// boundary mechanism fragments use
#[derive(Debug, Clone, Default)]
pub struct RawUnit {
    pub nodes: Vec<BlueprintNode>,
    pub connections: Vec<BlueprintConnection>,
    pub variables: Vec<BlueprintVariable>,
    pub boundary_pins: Vec<BoundaryPin>,
}

/// One ingredient of a composition: a registered fragment or raw nodes
#[derive(Debug, Clone)]
pub enum CompositionUnit {
    Fragment {
        fragment_id: String,
        tag: Option<String>,
    },
    Raw { unit: RawUnit, tag: Option<String> },
}

/// Everything the composer needs to build one asset
#[derive(Debug, Clone, Default)]
pub struct CompositionRequest {
    pub units: Vec<CompositionUnit>,
    pub links: Vec<UnitLink>,
    /// Boundary refs naming the nodes passes may start from
    pub entry_points: Vec<BoundaryRef>,
}

impl CompositionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragment(mut self, fragment_id: &str, tag: &str) -> Self {
        self.units.push(CompositionUnit::Fragment {
            fragment_id: fragment_id.to_string(),
            tag: Some(tag.to_string()),
        });
        self
    }

    pub fn raw(mut self, tag: &str, unit: RawUnit) -> Self {
        self.units.push(CompositionUnit::Raw {
            unit,
            tag: Some(tag.to_string()),
        });
        self
    }

    pub fn link(mut self, source: (&str, &str), target: (&str, &str)) -> Self {
        self.links.push(UnitLink {
            source: BoundaryRef::new(source.0, source.1),
            target: BoundaryRef::new(target.0, target.1),
        });
        self
    }

    pub fn entry(mut self, unit: &str, name: &str) -> Self {
        self.entry_points.push(BoundaryRef::new(unit, name));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Composer
// ─────────────────────────────────────────────────────────────────────────────

/// Builds validated assets out of composition requests
pub struct Composer {
    templates: Arc<NodeTemplateRegistry>,
    fragments: Arc<FragmentRegistry>,
    coercions: CoercionTable,
}

/// One unit after namespacing, before the merge
struct UnitCopy {
    tag: String,
    nodes: Vec<BlueprintNode>,
    connections: Vec<BlueprintConnection>,
    variables: Vec<BlueprintVariable>,
    /// exposed name -> (namespaced node id, pin id)
    boundaries: HashMap<String, (String, String)>,
}

impl Composer {
    pub fn new(templates: Arc<NodeTemplateRegistry>, fragments: Arc<FragmentRegistry>) -> Self {
        Self {
            templates,
            fragments,
            coercions: CoercionTable::new(),
        }
    }

    pub fn with_coercions(mut self, coercions: CoercionTable) -> Self {
        self.coercions = coercions;
        self
    }

    /// Merge, namespace, link and validate a composition request
    pub fn compose(&self, request: &CompositionRequest) -> Result<BlueprintAsset, ComposeError> {
        if request.entry_points.is_empty() {
            return Err(ComposeError::NoEntryPoints);
        }

        let copies = self.namespace_units(request)?;

        // Merge nodes and resolve every template up front
        let mut nodes: Vec<BlueprintNode> = Vec::new();
        let mut templates: HashMap<String, Arc<NodeTemplate>> = HashMap::new();
        for copy in &copies {
            for node in &copy.nodes {
                if templates.contains_key(&node.id) {
                    return Err(ComposeError::DuplicateNodeId {
                        node_id: node.id.clone(),
                    });
                }
                let template = self.templates.template(&node.template_id).map_err(|_| {
                    ComposeError::UnknownTemplate {
                        node_id: node.id.clone(),
                        template_id: node.template_id.clone(),
                    }
                })?;
                templates.insert(node.id.clone(), template);
                nodes.push(node.clone());
            }
        }

        let variables = merge_variables(&copies)?;
        let connections = self.resolve_connections(request, &copies)?;
        let entry_points = resolve_entry_points(request, &copies, &templates)?;

        validate_connections(&nodes, &connections, &templates, &self.coercions)?;
        let wildcard_bindings =
            resolve_wildcards(&nodes, &connections, &templates, &self.coercions)?;
        check_control_cycles(&nodes, &connections, &templates)?;
        check_data_cycles(&nodes, &connections, &templates)?;
        let loop_bodies = compute_loop_bodies(&nodes, &connections, &templates);

        debug!(
            nodes = nodes.len(),
            connections = connections.len(),
            entry_points = entry_points.len(),
            "composed blueprint asset"
        );

        Ok(BlueprintAsset {
            nodes,
            connections,
            variables,
            entry_points,
            wildcard_bindings,
            loop_bodies,
        })
    }

    // ── Namespacing ──

    fn namespace_units(&self, request: &CompositionRequest) -> Result<Vec<UnitCopy>, ComposeError> {
        let mut seen_tags = HashSet::new();
        let mut copies = Vec::with_capacity(request.units.len());
        for (index, unit) in request.units.iter().enumerate() {
            let (tag, nodes, connections, variables, boundary_pins) = match unit {
                CompositionUnit::Fragment { fragment_id, tag } => {
                    let fragment = self.fragments.get(fragment_id).map_err(|_| {
                        ComposeError::UnknownFragment {
                            fragment_id: fragment_id.clone(),
                        }
                    })?;
                    (
                        effective_tag(tag, index),
                        fragment.nodes.clone(),
                        fragment.connections.clone(),
                        fragment.variables.clone(),
                        fragment.boundary_pins.clone(),
                    )
                }
                CompositionUnit::Raw { unit, tag } => (
                    effective_tag(tag, index),
                    unit.nodes.clone(),
                    unit.connections.clone(),
                    unit.variables.clone(),
                    unit.boundary_pins.clone(),
                ),
            };
            if !seen_tags.insert(tag.clone()) {
                return Err(ComposeError::DuplicateInstanceTag { tag });
            }
            copies.push(namespace_unit(tag, nodes, connections, variables, boundary_pins));
        }
        Ok(copies)
    }

    // ── Connections ──

    fn resolve_connections(
        &self,
        request: &CompositionRequest,
        copies: &[UnitCopy],
    ) -> Result<Vec<BlueprintConnection>, ComposeError> {
        let mut connections: Vec<BlueprintConnection> = Vec::new();
        for copy in copies {
            connections.extend(copy.connections.iter().cloned());
        }
        for link in &request.links {
            let (source_node, source_pin) = resolve_boundary(copies, &link.source)?;
            let (target_node, target_pin) = resolve_boundary(copies, &link.target)?;
            connections.push(BlueprintConnection {
                source_node,
                source_pin,
                target_node,
                target_pin,
            });
        }
        Ok(connections)
    }
}

fn effective_tag(tag: &Option<String>, index: usize) -> String {
    tag.clone().unwrap_or_else(|| format!("unit{}", index))
}

fn namespace_unit(
    tag: String,
    nodes: Vec<BlueprintNode>,
    connections: Vec<BlueprintConnection>,
    variables: Vec<BlueprintVariable>,
    boundary_pins: Vec<BoundaryPin>,
) -> UnitCopy {
    let ns = |local: &str| format!("{}/{}", tag, local);

    // Instance-scoped variables are private to the unit and get namespaced
    // names; graph-scoped ones keep their name and are merged later.
    let instance_vars: HashSet<String> = variables
        .iter()
        .filter(|v| v.scope == VariableScope::Instance)
        .map(|v| v.name.clone())
        .collect();

    let nodes = nodes
        .into_iter()
        .map(|mut node| {
            node.id = ns(&node.id);
            if let Some(Value::String(name)) = node.overrides.get(VARIABLE_OVERRIDE_KEY) {
                if instance_vars.contains(name) {
                    let renamed = ns(name);
                    node.overrides
                        .insert(VARIABLE_OVERRIDE_KEY.to_string(), Value::String(renamed));
                }
            }
            node
        })
        .collect();

    let connections = connections
        .into_iter()
        .map(|mut conn| {
            conn.source_node = ns(&conn.source_node);
            conn.target_node = ns(&conn.target_node);
            conn
        })
        .collect();

    let variables = variables
        .into_iter()
        .map(|mut var| {
            if var.scope == VariableScope::Instance {
                var.name = ns(&var.name);
            }
            var
        })
        .collect();

    let boundaries = boundary_pins
        .into_iter()
        .map(|b| (b.exposed_name, (ns(&b.node_id), b.pin_id)))
        .collect();

    UnitCopy {
        tag,
        nodes,
        connections,
        variables,
        boundaries,
    }
}

fn resolve_boundary(
    copies: &[UnitCopy],
    reference: &BoundaryRef,
) -> Result<(String, String), ComposeError> {
    let copy = copies
        .iter()
        .find(|c| c.tag == reference.unit)
        .ok_or_else(|| ComposeError::UnknownUnit {
            unit: reference.unit.clone(),
        })?;
    copy.boundaries
        .get(&reference.name)
        .cloned()
        .ok_or_else(|| ComposeError::UnknownBoundary {
            unit: reference.unit.clone(),
            name: reference.name.clone(),
        })
}

fn merge_variables(copies: &[UnitCopy]) -> Result<Vec<BlueprintVariable>, ComposeError> {
    let mut merged: Vec<BlueprintVariable> = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();
    for copy in copies {
        for var in &copy.variables {
            if let Some(first) = owners.get(&var.name) {
                // Graph-scoped names are shared; two units declaring the same
                // one is ambiguous, not shadowing
                return Err(ComposeError::VariableCollision {
                    name: var.name.clone(),
                    first: first.clone(),
                    second: copy.tag.clone(),
                });
            }
            owners.insert(var.name.clone(), copy.tag.clone());
            merged.push(var.clone());
        }
    }
    Ok(merged)
}

fn resolve_entry_points(
    request: &CompositionRequest,
    copies: &[UnitCopy],
    templates: &HashMap<String, Arc<NodeTemplate>>,
) -> Result<Vec<String>, ComposeError> {
    let mut entry_points = Vec::new();
    for reference in &request.entry_points {
        let (node_id, pin_id) = resolve_boundary(copies, reference)?;
        if !templates.contains_key(&node_id) {
            return Err(ComposeError::MissingEntryPoint { node_id });
        }
        // A data boundary must not smuggle a node into the entry table
        let pin = pin_of(templates, &node_id, &pin_id)?;
        if pin.kind != PinKind::Control || pin.direction != PinDirection::Output {
            return Err(ComposeError::BadEntryPoint { node_id, pin_id });
        }
        if !entry_points.contains(&node_id) {
            entry_points.push(node_id);
        }
    }
    Ok(entry_points)
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

fn pin_of<'a>(
    templates: &'a HashMap<String, Arc<NodeTemplate>>,
    node_id: &str,
    pin_id: &str,
) -> Result<&'a Pin, ComposeError> {
    let template = templates
        .get(node_id)
        .ok_or_else(|| ComposeError::UnknownNode {
            node_id: node_id.to_string(),
        })?;
    template.pin(pin_id).ok_or_else(|| ComposeError::UnknownPin {
        node_id: node_id.to_string(),
        pin_id: pin_id.to_string(),
    })
}

fn validate_connections(
    _nodes: &[BlueprintNode],
    connections: &[BlueprintConnection],
    templates: &HashMap<String, Arc<NodeTemplate>>,
    coercions: &CoercionTable,
) -> Result<(), ComposeError> {
    let mut data_fan_in: HashMap<(String, String), u32> = HashMap::new();

    for conn in connections {
        let source = pin_of(templates, &conn.source_node, &conn.source_pin)?;
        let target = pin_of(templates, &conn.target_node, &conn.target_pin)?;

        let bad = |reason: &str| ComposeError::BadConnection {
            source_node: conn.source_node.clone(),
            source_pin: conn.source_pin.clone(),
            target_node: conn.target_node.clone(),
            target_pin: conn.target_pin.clone(),
            reason: reason.to_string(),
        };

        if source.direction != PinDirection::Output {
            return Err(bad("source is not an output pin"));
        }
        if target.direction != PinDirection::Input {
            return Err(bad("target is not an input pin"));
        }
        if source.kind != target.kind {
            return Err(bad("control and data pins cannot be connected"));
        }

        if source.kind == PinKind::Data {
            if !coercions.compatible(&source.data_type, &target.data_type) {
                return Err(ComposeError::TypeMismatch {
                    source_node: conn.source_node.clone(),
                    source_pin: conn.source_pin.clone(),
                    source_type: source.data_type.to_string(),
                    target_node: conn.target_node.clone(),
                    target_pin: conn.target_pin.clone(),
                    target_type: target.data_type.to_string(),
                });
            }
            let count = data_fan_in
                .entry((conn.target_node.clone(), conn.target_pin.clone()))
                .or_insert(0);
            *count += 1;
            if *count > 1 {
                return Err(ComposeError::DataFanIn {
                    node_id: conn.target_node.clone(),
                    pin_id: conn.target_pin.clone(),
                });
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Wildcard Resolution
// ─────────────────────────────────────────────────────────────────────────────

fn value_data_type(value: &Value) -> Option<DataType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(DataType::Bool),
        Value::Int(_) => Some(DataType::Int),
        Value::Float(_) => Some(DataType::Float),
        Value::String(_) => Some(DataType::String),
        Value::List(_) => Some(DataType::List),
        Value::Object(obj) => Some(DataType::object(obj.type_id.clone())),
    }
}

/// Propagate concrete types across connections until every wildcard pin in
/// the graph has a binding, and cache the bindings on the asset
fn resolve_wildcards(
    nodes: &[BlueprintNode],
    connections: &[BlueprintConnection],
    templates: &HashMap<String, Arc<NodeTemplate>>,
    coercions: &CoercionTable,
) -> Result<BTreeMap<String, DataType>, ComposeError> {
    let mut bindings: BTreeMap<String, DataType> = BTreeMap::new();

    let effective = |bindings: &BTreeMap<String, DataType>,
                     node_id: &str,
                     pin: &Pin|
     -> Option<DataType> {
        if pin.data_type.is_wildcard() {
            bindings.get(&pin_key(node_id, &pin.id)).cloned()
        } else {
            Some(pin.data_type.clone())
        }
    };

    // Fixpoint: each round may unlock further propagation through chains of
    // wildcard pins
    loop {
        let mut changed = false;
        for conn in connections {
            let source = pin_of(templates, &conn.source_node, &conn.source_pin)?;
            let target = pin_of(templates, &conn.target_node, &conn.target_pin)?;
            if source.kind != PinKind::Data {
                continue;
            }
            let source_type = effective(&bindings, &conn.source_node, source);
            let target_type = effective(&bindings, &conn.target_node, target);
            match (source_type, target_type) {
                (Some(st), None) => {
                    bindings.insert(pin_key(&conn.target_node, &conn.target_pin), st);
                    changed = true;
                }
                (None, Some(tt)) => {
                    bindings.insert(pin_key(&conn.source_node, &conn.source_pin), tt);
                    changed = true;
                }
                (Some(st), Some(tt)) => {
                    if !coercions.compatible(&st, &tt) {
                        return Err(ComposeError::TypeMismatch {
                            source_node: conn.source_node.clone(),
                            source_pin: conn.source_pin.clone(),
                            source_type: st.to_string(),
                            target_node: conn.target_node.clone(),
                            target_pin: conn.target_pin.clone(),
                            target_type: tt.to_string(),
                        });
                    }
                }
                (None, None) => {}
            }
        }
        if !changed {
            break;
        }
    }

    // Unconnected wildcard inputs can still resolve from an override or a
    // template default; anything left over is an authoring error
    for node in nodes {
        let template = &templates[&node.id];
        for pin in &template.pins {
            if !pin.data_type.is_wildcard() {
                continue;
            }
            let key = pin_key(&node.id, &pin.id);
            if bindings.contains_key(&key) {
                continue;
            }
            let fallback = node
                .overrides
                .get(&pin.id)
                .and_then(value_data_type)
                .or_else(|| pin.default.as_ref().and_then(value_data_type));
            match fallback {
                Some(data_type) => {
                    bindings.insert(key, data_type);
                }
                None => {
                    return Err(ComposeError::UnresolvedWildcard {
                        node_id: node.id.clone(),
                        pin_id: pin.id.clone(),
                    });
                }
            }
        }
    }

    Ok(bindings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle Checks
// ─────────────────────────────────────────────────────────────────────────────

/// Kahn's algorithm over an adjacency map; returns a node left with incoming
/// edges if a cycle exists (smallest id, so errors are deterministic)
fn find_cycle_node(
    members: &HashSet<String>,
    edges: &[(String, String)],
) -> Option<String> {
    let mut in_degree: HashMap<&str, usize> =
        members.iter().map(|n| (n.as_str(), 0)).collect();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        if members.contains(from) && members.contains(to) {
            *in_degree.entry(to.as_str()).or_insert(0) += 1;
            outgoing.entry(from.as_str()).or_default().push(to.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| *n)
        .collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        let next = outgoing.get(node).cloned().unwrap_or_default();
        for to in next {
            if let Some(degree) = in_degree.get_mut(to) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(to);
                }
            }
        }
    }

    if visited == members.len() {
        return None;
    }
    in_degree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(n, _)| n.to_string())
        .min()
}

/// Control cycles are legal only when they run through a loop construct;
/// deleting loop nodes must leave the control subgraph acyclic
fn check_control_cycles(
    nodes: &[BlueprintNode],
    connections: &[BlueprintConnection],
    templates: &HashMap<String, Arc<NodeTemplate>>,
) -> Result<(), ComposeError> {
    let members: HashSet<String> = nodes
        .iter()
        .filter(|n| !templates[&n.id].loop_construct)
        .map(|n| n.id.clone())
        .collect();
    let edges: Vec<(String, String)> = connections
        .iter()
        .filter(|c| {
            templates
                .get(&c.source_node)
                .and_then(|t| t.pin(&c.source_pin))
                .is_some_and(|p| p.kind == PinKind::Control)
        })
        .map(|c| (c.source_node.clone(), c.target_node.clone()))
        .collect();

    match find_cycle_node(&members, &edges) {
        Some(node_id) => Err(ComposeError::ControlCycle { node_id }),
        None => Ok(()),
    }
}

/// The demand-driven pull only recurses through pure producers, so a cycle
/// among pure nodes' data edges would never terminate at run time
fn check_data_cycles(
    nodes: &[BlueprintNode],
    connections: &[BlueprintConnection],
    templates: &HashMap<String, Arc<NodeTemplate>>,
) -> Result<(), ComposeError> {
    let members: HashSet<String> = nodes
        .iter()
        .filter(|n| templates[&n.id].is_pure())
        .map(|n| n.id.clone())
        .collect();
    let edges: Vec<(String, String)> = connections
        .iter()
        .filter(|c| {
            templates
                .get(&c.source_node)
                .and_then(|t| t.pin(&c.source_pin))
                .is_some_and(|p| p.kind == PinKind::Data)
        })
        .map(|c| (c.source_node.clone(), c.target_node.clone()))
        .collect();

    match find_cycle_node(&members, &edges) {
        Some(node_id) => Err(ComposeError::DataCycle { node_id }),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop Bodies
// ─────────────────────────────────────────────────────────────────────────────

/// For each loop construct: the nodes whose memoized outputs go stale when a
/// new iteration starts. That is every node control-reachable from the body
/// pin, plus every pure producer feeding those nodes (or the loop's own
/// inputs, so break conditions are re-evaluated).
fn compute_loop_bodies(
    nodes: &[BlueprintNode],
    connections: &[BlueprintConnection],
    templates: &HashMap<String, Arc<NodeTemplate>>,
) -> BTreeMap<String, Vec<String>> {
    let mut bodies = BTreeMap::new();
    for node in nodes {
        if !templates[&node.id].loop_construct {
            continue;
        }

        // Control-reachable from the body pin
        let mut body: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = connections
            .iter()
            .filter(|c| c.source_node == node.id && c.source_pin == LOOP_BODY_PIN)
            .map(|c| c.target_node.clone())
            .collect();
        while let Some(current) = frontier.pop_front() {
            if current == node.id || !body.insert(current.clone()) {
                continue;
            }
            for conn in connections {
                if conn.source_node != current {
                    continue;
                }
                let is_control = templates
                    .get(&conn.source_node)
                    .and_then(|t| t.pin(&conn.source_pin))
                    .is_some_and(|p| p.kind == PinKind::Control);
                if is_control {
                    frontier.push_back(conn.target_node.clone());
                }
            }
        }

        // Transitive pure producers feeding the body or the loop node itself
        let mut invalidated = body.clone();
        let mut walk: VecDeque<String> = body.iter().cloned().collect();
        walk.push_back(node.id.clone());
        let mut seen: HashSet<String> = walk.iter().cloned().collect();
        while let Some(current) = walk.pop_front() {
            for conn in connections {
                if conn.target_node != current {
                    continue;
                }
                let producer = &conn.source_node;
                let Some(template) = templates.get(producer) else {
                    continue;
                };
                if template.is_pure() && seen.insert(producer.clone()) {
                    invalidated.insert(producer.clone());
                    walk.push_back(producer.clone());
                }
            }
        }

        let mut sorted: Vec<String> = invalidated.into_iter().collect();
        sorted.sort();
        bodies.insert(node.id.clone(), sorted);
    }
    bodies
}
