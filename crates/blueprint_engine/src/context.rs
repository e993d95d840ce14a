//! Per-node execution context and the outcome a node executor reports.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blueprint_graph::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Suspension Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a parked pass, returned to the host when a latent node suspends
///
/// The engine makes no assumption about what wakes a suspension or when; the
/// host owns the wake policy and calls [`crate::ExecutionEngine::resume`] with
/// the token whenever its external operation settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionToken {
    pub id: Uuid,
    /// Node that suspended
    pub node_id: String,
    /// Control output to advance when the suspension resolves successfully
    pub resume_pin: String,
    /// Data output that receives the resume value, if the node declares one
    pub output_pin: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Execution Results
// ─────────────────────────────────────────────────────────────────────────────

/// What a node executor tells the engine to do next
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Enqueue the targets of one control output
    Advance(String),
    /// Enqueue the targets of several control outputs, in the given order
    AdvanceMultiple(Vec<String>),
    /// This control branch ends here
    Complete,
    /// Park the pass until the host resumes it with the token
    Suspend(SuspensionToken),
    /// Abort the whole pass
    Fail { kind: String, message: String },
}

impl ExecutionResult {
    pub fn advance(pin: &str) -> Self {
        ExecutionResult::Advance(pin.to_string())
    }

    pub fn fail(kind: &str, message: impl Into<String>) -> Self {
        ExecutionResult::Fail {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a node executor may read or write during one visit
///
/// Inputs are resolved by the engine before the executor runs, so executors
/// never pull data themselves. Variable writes and the state slot are copied
/// back into the pass after the executor returns.
pub struct NodeContext {
    pub node_id: String,
    pub template_id: String,
    /// Resolved data inputs, keyed by pin id
    pub inputs: HashMap<String, Value>,
    /// Per-instance overrides from the composed asset
    pub overrides: BTreeMap<String, Value>,
    /// Mutable instance-scoped variables of this pass
    pub variables: HashMap<String, Value>,
    /// Read-only graph-scoped constants, shared by every node visit
    pub constants: Arc<HashMap<String, Value>>,
    /// Private per-node slot that survives across visits within one pass
    /// (loop counters, accumulated state)
    pub state: Value,
    outputs: HashMap<String, Value>,
}

impl NodeContext {
    pub fn new(
        node_id: String,
        template_id: String,
        inputs: HashMap<String, Value>,
        overrides: BTreeMap<String, Value>,
        variables: HashMap<String, Value>,
        constants: Arc<HashMap<String, Value>>,
        state: Value,
    ) -> Self {
        Self {
            node_id,
            template_id,
            inputs,
            overrides,
            variables,
            constants,
            state,
            outputs: HashMap::new(),
        }
    }

    // ── Inputs ──

    pub fn input(&self, pin: &str) -> Value {
        self.inputs.get(pin).cloned().unwrap_or(Value::Null)
    }

    pub fn input_bool(&self, pin: &str) -> Option<bool> {
        self.inputs.get(pin).and_then(Value::as_bool)
    }

    pub fn input_int(&self, pin: &str) -> Option<i64> {
        self.inputs.get(pin).and_then(Value::as_int)
    }

    pub fn input_float(&self, pin: &str) -> Option<f64> {
        self.inputs.get(pin).and_then(Value::as_float)
    }

    pub fn input_str(&self, pin: &str) -> Option<&str> {
        self.inputs.get(pin).and_then(Value::as_str)
    }

    pub fn override_str(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).and_then(Value::as_str)
    }

    pub fn override_int(&self, key: &str) -> Option<i64> {
        self.overrides.get(key).and_then(Value::as_int)
    }

    // ── Variables ──

    /// Instance variable if one exists, falling back to graph constants
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables
            .get(name)
            .or_else(|| self.constants.get(name))
            .cloned()
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    pub fn set_variable(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    // ── Outputs ──

    pub fn set_output(&mut self, pin: &str, value: impl Into<Value>) {
        self.outputs.insert(pin.to_string(), value.into());
    }

    pub(crate) fn take_outputs(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.outputs)
    }

    // ── Results ──

    /// Park the pass; the engine hands the returned token to the host
    pub fn suspend(&self, resume_pin: &str, output_pin: Option<&str>) -> ExecutionResult {
        ExecutionResult::Suspend(SuspensionToken {
            id: Uuid::new_v4(),
            node_id: self.node_id.clone(),
            resume_pin: resume_pin.to_string(),
            output_pin: output_pin.map(str::to_string),
        })
    }
}
