//! Pin & type model: typed connection endpoints and compatibility rules.
//!
//! Compatibility checking is pure and total; an incompatible pair is an
//! ordinary `false`, never a panic. The composer turns `false` into a
//! composition error, so type mismatches can never surface at run time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ─────────────────────────────────────────────────────────────────────────────
// Pin Basics
// ─────────────────────────────────────────────────────────────────────────────

/// Direction of a pin on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    Input,
    Output,
}

/// Whether a pin carries control flow or data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    Control,
    Data,
}

/// Data types that can flow through data pins
///
/// Control pins carry no payload and always use [`DataType::None`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "PascalCase")]
pub enum DataType {
    /// No payload (control pins only)
    None,
    Bool,
    Int,
    Float,
    String,
    List,
    /// Opaque handle to a host object of the given type
    Object { type_id: String },
    /// Adapts to whatever concrete type the connected peer carries;
    /// resolved and cached during composition
    Wildcard,
}

impl DataType {
    pub fn object(type_id: impl Into<String>) -> Self {
        DataType::Object {
            type_id: type_id.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, DataType::Wildcard)
    }

    pub fn is_concrete(&self) -> bool {
        !matches!(self, DataType::Wildcard | DataType::None)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::None => write!(f, "None"),
            DataType::Bool => write!(f, "Bool"),
            DataType::Int => write!(f, "Int"),
            DataType::Float => write!(f, "Float"),
            DataType::String => write!(f, "String"),
            DataType::List => write!(f, "List"),
            DataType::Object { type_id } => write!(f, "Object<{}>", type_id),
            DataType::Wildcard => write!(f, "Wildcard"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pin Definition
// ─────────────────────────────────────────────────────────────────────────────

/// A typed connection endpoint on a node template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    /// Pin identifier, unique within its template (used in connections)
    pub id: String,
    /// Human-readable display name
    pub name: String,
    pub direction: PinDirection,
    pub kind: PinKind,
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Default value for unconnected data inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<crate::value::Value>,
}

impl Pin {
    /// The control input pin (every executable node has exactly one)
    pub fn control_in() -> Self {
        Self {
            id: "run".to_string(),
            name: "Run".to_string(),
            direction: PinDirection::Input,
            kind: PinKind::Control,
            data_type: DataType::None,
            default: None,
        }
    }

    /// A control output pin with a custom id
    pub fn control_out(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            direction: PinDirection::Output,
            kind: PinKind::Control,
            data_type: DataType::None,
            default: None,
        }
    }

    pub fn data_in(id: &str, data_type: DataType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            direction: PinDirection::Input,
            kind: PinKind::Data,
            data_type,
            default: None,
        }
    }

    pub fn data_in_with_default(
        id: &str,
        data_type: DataType,
        default: crate::value::Value,
    ) -> Self {
        Self {
            default: Some(default),
            ..Self::data_in(id, data_type)
        }
    }

    pub fn data_out(id: &str, data_type: DataType) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            direction: PinDirection::Output,
            kind: PinKind::Data,
            data_type,
            default: None,
        }
    }

    pub fn is_control(&self) -> bool {
        self.kind == PinKind::Control
    }

    pub fn is_data(&self) -> bool {
        self.kind == PinKind::Data
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Coercion Table
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed table of allowed implicit conversions between data types
///
/// `Int → Float` is always allowed. Hosts register object supertype edges
/// (`concrete type → declared supertype`) before composition; nothing else
/// ever widens implicitly.
#[derive(Debug, Clone, Default)]
pub struct CoercionTable {
    /// Allowed object widenings, as (from_type_id, to_type_id)
    object_supertypes: HashSet<(String, String)>,
}

impl CoercionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that objects of `type_id` may flow into pins of `supertype_id`
    pub fn allow_object_supertype(
        &mut self,
        type_id: impl Into<String>,
        supertype_id: impl Into<String>,
    ) {
        self.object_supertypes
            .insert((type_id.into(), supertype_id.into()));
    }

    /// Whether a value of type `source` may feed a pin of type `target`
    ///
    /// Wildcards are compatible with any data type here; the composer still
    /// requires every wildcard to resolve to a concrete type before an asset
    /// is produced.
    pub fn compatible(&self, source: &DataType, target: &DataType) -> bool {
        match (source, target) {
            (a, b) if a == b => true,
            (DataType::Wildcard, _) | (_, DataType::Wildcard) => true,
            (DataType::Int, DataType::Float) => true,
            (DataType::Object { type_id: from }, DataType::Object { type_id: to }) => self
                .object_supertypes
                .contains(&(from.clone(), to.clone())),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_compatible() {
        let table = CoercionTable::new();
        assert!(table.compatible(&DataType::Float, &DataType::Float));
        assert!(table.compatible(&DataType::Bool, &DataType::Bool));
    }

    #[test]
    fn int_coerces_to_float_only_one_way() {
        let table = CoercionTable::new();
        assert!(table.compatible(&DataType::Int, &DataType::Float));
        assert!(!table.compatible(&DataType::Float, &DataType::Int));
    }

    #[test]
    fn wildcard_accepts_anything() {
        let table = CoercionTable::new();
        assert!(table.compatible(&DataType::Wildcard, &DataType::String));
        assert!(table.compatible(&DataType::object("npc"), &DataType::Wildcard));
    }

    #[test]
    fn object_supertype_requires_registration() {
        let mut table = CoercionTable::new();
        let npc = DataType::object("npc");
        let actor = DataType::object("actor");
        assert!(!table.compatible(&npc, &actor));

        table.allow_object_supertype("npc", "actor");
        assert!(table.compatible(&npc, &actor));
        // Widening is directional
        assert!(!table.compatible(&actor, &npc));
    }

    #[test]
    fn mismatched_primitives_rejected() {
        let table = CoercionTable::new();
        assert!(!table.compatible(&DataType::Bool, &DataType::String));
        assert!(!table.compatible(&DataType::String, &DataType::Float));
    }
}
