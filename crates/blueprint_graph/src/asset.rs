//! The composed blueprint asset document.
//!
//! An asset is produced by the composer and immutable afterwards; every
//! mutation happens through re-composition. Nodes and connections live in
//! flat tables keyed by id, so cyclic references are plain strings rather
//! than owned links, and serialization round-trips byte-for-byte (Vec
//! ordering and BTreeMap keys are stable).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pin::DataType;
use crate::value::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Nodes & Connections
// ─────────────────────────────────────────────────────────────────────────────

/// A node instance inside a composed graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintNode {
    /// Instance id, unique within the owning graph
    pub id: String,
    /// Template this instance conforms to
    pub template_id: String,
    /// Per-instance values for unconnected data inputs (pin id -> value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, Value>,
}

impl BlueprintNode {
    pub fn new(id: &str, template_id: &str) -> Self {
        Self {
            id: id.to_string(),
            template_id: template_id.to_string(),
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, pin_id: &str, value: impl Into<Value>) -> Self {
        self.overrides.insert(pin_id.to_string(), value.into());
        self
    }
}

/// A directed connection between two pins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueprintConnection {
    pub source_node: String,
    pub source_pin: String,
    pub target_node: String,
    pub target_pin: String,
}

impl BlueprintConnection {
    pub fn new(source_node: &str, source_pin: &str, target_node: &str, target_pin: &str) -> Self {
        Self {
            source_node: source_node.to_string(),
            source_pin: source_pin.to_string(),
            target_node: target_node.to_string(),
            target_pin: target_pin.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Variables
// ─────────────────────────────────────────────────────────────────────────────

/// Scope of a blueprint variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    /// Shared read-only constant after composition
    Graph,
    /// Mutable per execution pass
    Instance,
}

/// A named variable in a composed graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default)]
    pub default: Value,
    pub scope: VariableScope,
}

impl BlueprintVariable {
    pub fn graph(name: &str, data_type: DataType, default: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            default: default.into(),
            scope: VariableScope::Graph,
        }
    }

    pub fn instance(name: &str, data_type: DataType, default: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            default: default.into(),
            scope: VariableScope::Instance,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Asset
// ─────────────────────────────────────────────────────────────────────────────

/// Key for per-pin composition caches, formatted as `node_id.pin_id`
pub fn pin_key(node_id: &str, pin_id: &str) -> String {
    format!("{}.{}", node_id, pin_id)
}

/// A composed, validated, executable blueprint
///
/// Safe to share across concurrent passes behind an `Arc`; nothing in here
/// changes after composition succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintAsset {
    pub nodes: Vec<BlueprintNode>,
    pub connections: Vec<BlueprintConnection>,
    pub variables: Vec<BlueprintVariable>,
    /// Node ids at which passes may start
    pub entry_points: Vec<String>,
    /// Concrete types resolved for wildcard pins, keyed `node_id.pin_id`;
    /// cached here so the engine never re-runs type inference
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wildcard_bindings: BTreeMap<String, DataType>,
    /// For each loop-construct node: the nodes whose memoized data outputs
    /// are invalidated when a new iteration begins
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_bodies: BTreeMap<String, Vec<String>>,
}

impl BlueprintAsset {
    pub fn node(&self, id: &str) -> Option<&BlueprintNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_entry_point(&self, id: &str) -> bool {
        self.entry_points.iter().any(|e| e == id)
    }

    /// All connections leaving a specific pin
    pub fn connections_out_of<'a>(
        &'a self,
        node_id: &'a str,
        pin_id: &'a str,
    ) -> impl Iterator<Item = &'a BlueprintConnection> {
        self.connections
            .iter()
            .filter(move |c| c.source_node == node_id && c.source_pin == pin_id)
    }

    /// The at-most-one connection feeding a data input pin
    pub fn connection_into(&self, node_id: &str, pin_id: &str) -> Option<&BlueprintConnection> {
        self.connections
            .iter()
            .find(|c| c.target_node == node_id && c.target_pin == pin_id)
    }

    pub fn variable(&self, name: &str) -> Option<&BlueprintVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn graph_variables(&self) -> impl Iterator<Item = &BlueprintVariable> {
        self.variables
            .iter()
            .filter(|v| v.scope == VariableScope::Graph)
    }

    pub fn instance_variables(&self) -> impl Iterator<Item = &BlueprintVariable> {
        self.variables
            .iter()
            .filter(|v| v.scope == VariableScope::Instance)
    }

    /// The cached concrete type of a wildcard pin, if that pin was a wildcard
    pub fn wildcard_type(&self, node_id: &str, pin_id: &str) -> Option<&DataType> {
        self.wildcard_bindings.get(&pin_key(node_id, pin_id))
    }

    /// Memo-invalidation set for a loop-construct node
    pub fn loop_body(&self, node_id: &str) -> &[String] {
        self.loop_bodies
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
