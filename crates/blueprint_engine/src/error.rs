//! Error taxonomy for composition, registration and execution.
//!
//! Composition errors are all-or-nothing: if `compose` returns any of these,
//! no asset was produced and nothing was registered. Pass errors carry enough
//! context (node ids, pin ids, bounds) for a host to log something actionable
//! without re-running the pass.

use thiserror::Error;

use blueprint_graph::TemplateError;

// ─────────────────────────────────────────────────────────────────────────────
// Registry Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure while registering or resolving node templates
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The template table is append-only; re-registration is always a bug
    #[error("template '{template_id}' is already registered")]
    AlreadyRegistered { template_id: String },

    #[error("template '{template_id}' is not registered")]
    UnknownTemplate { template_id: String },

    #[error(transparent)]
    Invalid(#[from] TemplateError),
}

/// Failure while registering or resolving fragments
#[derive(Debug, Clone, Error)]
pub enum FragmentError {
    #[error("fragment '{fragment_id}' is already registered")]
    AlreadyRegistered { fragment_id: String },

    #[error("fragment '{fragment_id}' is not registered")]
    UnknownFragment { fragment_id: String },

    #[error("fragment '{fragment_id}' exposes boundary name '{exposed_name}' more than once")]
    DuplicateBoundary {
        fragment_id: String,
        exposed_name: String,
    },

    #[error("boundary pin '{exposed_name}' of fragment '{fragment_id}' references unknown node '{node_id}'")]
    BoundaryTargetMissing {
        fragment_id: String,
        exposed_name: String,
        node_id: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Composition Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Rejected composition request; the output asset was never built
#[derive(Debug, Clone, Error)]
pub enum ComposeError {
    #[error("template '{template_id}' (node '{node_id}') is not registered")]
    UnknownTemplate {
        node_id: String,
        template_id: String,
    },

    #[error("fragment '{fragment_id}' is not registered")]
    UnknownFragment { fragment_id: String },

    #[error("instance tag '{tag}' is used by more than one composition unit")]
    DuplicateInstanceTag { tag: String },

    #[error("node id '{node_id}' occurs more than once after namespacing")]
    DuplicateNodeId { node_id: String },

    #[error("connection references unknown node '{node_id}'")]
    UnknownNode { node_id: String },

    #[error("node '{node_id}' has no pin '{pin_id}'")]
    UnknownPin { node_id: String, pin_id: String },

    #[error("unit '{unit}' has no boundary pin named '{name}'")]
    UnknownBoundary { unit: String, name: String },

    #[error("no composition unit is tagged '{unit}'")]
    UnknownUnit { unit: String },

    #[error(
        "connection {source_node}.{source_pin} -> {target_node}.{target_pin} is invalid: {reason}"
    )]
    BadConnection {
        source_node: String,
        source_pin: String,
        target_node: String,
        target_pin: String,
        reason: String,
    },

    #[error(
        "type mismatch: {source_node}.{source_pin} ({source_type}) cannot feed {target_node}.{target_pin} ({target_type})"
    )]
    TypeMismatch {
        source_node: String,
        source_pin: String,
        source_type: String,
        target_node: String,
        target_pin: String,
        target_type: String,
    },

    #[error("data input '{node_id}.{pin_id}' has more than one incoming connection")]
    DataFanIn { node_id: String, pin_id: String },

    #[error("control cycle through '{node_id}' does not pass through a loop construct")]
    ControlCycle { node_id: String },

    #[error("static data dependency cycle through '{node_id}'")]
    DataCycle { node_id: String },

    #[error("wildcard pin '{node_id}.{pin_id}' never resolves to a concrete type")]
    UnresolvedWildcard { node_id: String, pin_id: String },

    #[error("graph variable '{name}' is declared by both '{first}' and '{second}'")]
    VariableCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("entry point '{node_id}' does not exist in the composed graph")]
    MissingEntryPoint { node_id: String },

    #[error("entry point boundary '{node_id}.{pin_id}' must be a control output")]
    BadEntryPoint { node_id: String, pin_id: String },

    #[error("composition declares no entry points")]
    NoEntryPoints,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure inside or against a running execution pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error("data dependency cycle detected while pulling '{node_id}.{pin_id}'")]
    DataCycle { node_id: String, pin_id: String },

    #[error("loop node '{node_id}' exceeded its iteration bound of {bound}")]
    LoopBoundExceeded { node_id: String, bound: u32 },

    #[error("node '{node_id}' failed ({kind}): {message}")]
    Node {
        node_id: String,
        kind: String,
        message: String,
    },

    /// A composed asset should never reference missing nodes or templates;
    /// hitting these means the asset was tampered with after composition
    #[error("asset references unknown node '{node_id}'")]
    UnknownNode { node_id: String },

    #[error("asset references unregistered template '{template_id}'")]
    UnknownTemplate { template_id: String },

    #[error("node '{node_id}' is not a declared entry point")]
    NotEntryPoint { node_id: String },

    #[error("no pass with id {pass_id}")]
    UnknownPass { pass_id: uuid::Uuid },

    #[error("no pending suspension with token {token}")]
    UnknownSuspension { token: uuid::Uuid },

    #[error("pass is {state} and cannot {action}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Trigger Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure while registering trigger bindings
#[derive(Debug, Clone, Error)]
pub enum TriggerError {
    #[error("trigger entry point '{node_id}' is not declared by the bound asset")]
    UnknownEntryPoint { node_id: String },

    #[error("no trigger binding with id {trigger_id}")]
    UnknownBinding { trigger_id: uuid::Uuid },
}
