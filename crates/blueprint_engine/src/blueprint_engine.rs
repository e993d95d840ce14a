//! Blueprint composition and execution.
//!
//! The composer merges registered fragments and raw graph pieces into
//! validated, immutable [`BlueprintAsset`]s; the execution engine runs
//! concurrent passes over them, walking control flow through a work queue
//! and pulling data flow on demand with per-pass memoization. The trigger
//! system routes host events into fresh passes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use blueprint_engine::{
//!     register_builtins, Composer, ExecutionEngine, FragmentRegistry, NodeTemplateRegistry,
//! };
//!
//! let mut templates = NodeTemplateRegistry::new();
//! register_builtins(&mut templates).unwrap();
//! let templates = Arc::new(templates);
//! let fragments = Arc::new(FragmentRegistry::new());
//! let composer = Composer::new(templates.clone(), fragments);
//! let engine = ExecutionEngine::new(templates);
//! # let _ = (composer, engine);
//! ```

pub mod composer;
pub mod context;
pub mod engine;
pub mod error;
pub mod fragments;
pub mod nodes;
pub mod registry;
pub mod trigger;

pub use composer::{
    BoundaryRef, Composer, CompositionRequest, CompositionUnit, RawUnit, UnitLink,
};
pub use context::{ExecutionResult, NodeContext, SuspensionToken};
pub use engine::{
    CancellationFlag, EngineConfig, ExecutionEngine, PassHandle, PassId, PassStatus,
};
pub use error::{ComposeError, FragmentError, PassError, RegistryError, TriggerError};
pub use fragments::FragmentRegistry;
pub use nodes::register_builtins;
pub use registry::{FnNodeExecutor, NodeExecutor, NodeTemplateRegistry};
pub use trigger::{EventMatcher, GameEvent, TriggerId, TriggerSystem};

// Re-export the data model so hosts depend on one crate
pub use blueprint_graph::{
    BlueprintAsset, BlueprintConnection, BlueprintNode, BlueprintVariable, BoundaryPin,
    CoercionTable, DataType, Fragment, NodeTemplate, ObjectId, ObjectRef, Pin, Value,
    VariableScope,
};
