//! Fragments: reusable partial graphs with declared boundary pins.
//!
//! A fragment's internal node ids are local to it; the only way a composing
//! context may attach to a fragment is through its boundary pins, so the
//! composer is free to remap internals without breaking callers.

use serde::{Deserialize, Serialize};

use crate::asset::{BlueprintConnection, BlueprintNode, BlueprintVariable};

/// A pin inside a fragment exposed under a stable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryPin {
    /// Local node id inside the fragment
    pub node_id: String,
    /// Pin id on that node's template
    pub pin_id: String,
    /// Name visible to composing contexts
    pub exposed_name: String,
}

impl BoundaryPin {
    pub fn new(node_id: &str, pin_id: &str, exposed_name: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            pin_id: pin_id.to_string(),
            exposed_name: exposed_name.to_string(),
        }
    }
}

/// A reusable named subgraph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Unique identifier within a fragment registry
    pub id: String,
    /// Free-form tags for registry listing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<BlueprintNode>,
    #[serde(default)]
    pub connections: Vec<BlueprintConnection>,
    #[serde(default)]
    pub variables: Vec<BlueprintVariable>,
    /// The only attachment points visible to composing contexts
    #[serde(default)]
    pub boundary_pins: Vec<BoundaryPin>,
}

impl Fragment {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            tags: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            variables: Vec::new(),
            boundary_pins: Vec::new(),
        }
    }

    pub fn boundary(&self, exposed_name: &str) -> Option<&BoundaryPin> {
        self.boundary_pins
            .iter()
            .find(|b| b.exposed_name == exposed_name)
    }

    pub fn node(&self, id: &str) -> Option<&BlueprintNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_lookup_by_exposed_name() {
        let mut frag = Fragment::new("math/add");
        frag.nodes.push(BlueprintNode::new("adder", "core/Add"));
        frag.boundary_pins
            .push(BoundaryPin::new("adder", "a", "in_a"));
        frag.boundary_pins
            .push(BoundaryPin::new("adder", "sum", "out_sum"));

        let b = frag.boundary("in_a").unwrap();
        assert_eq!(b.node_id, "adder");
        assert_eq!(b.pin_id, "a");
        assert!(frag.boundary("nope").is_none());
    }

    #[test]
    fn tags() {
        let mut frag = Fragment::new("ai/patrol");
        frag.tags.push("ai".to_string());
        assert!(frag.has_tag("ai"));
        assert!(!frag.has_tag("math"));
    }
}
