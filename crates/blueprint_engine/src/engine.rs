//! The execution engine: queue-driven control flow over composed assets,
//! with demand-driven memoized data evaluation.
//!
//! An asset is shared immutably across any number of concurrent passes; all
//! mutable run state (memo cache, variables, loop counters, suspensions)
//! lives on the pass. Suspension tokens park a pass until the host resumes
//! it; the engine never decides when a suspension wakes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use blueprint_graph::{pin_key, BlueprintAsset, BlueprintNode, Pin, Value};

use crate::composer::LOOP_BODY_PIN;
use crate::context::{ExecutionResult, NodeContext, SuspensionToken};
use crate::error::PassError;
use crate::registry::NodeTemplateRegistry;

type ValueFuture<'a> = std::pin::Pin<Box<dyn Future<Output = Result<Value, PassError>> + Send + 'a>>;

// ─────────────────────────────────────────────────────────────────────────────
// Handles & Status
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of one execution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(pub Uuid);

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cooperative cancellation flag, checked at every node-visit boundary
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Host-side handle to a pass
#[derive(Debug, Clone)]
pub struct PassHandle {
    pub id: PassId,
    cancel: CancellationFlag,
}

impl PassHandle {
    /// Request cancellation; a running pass stops before its next node visit
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Externally visible state of a pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassStatus {
    Ready,
    Running,
    Suspended { pending: Vec<SuspensionToken> },
    Completed,
    Cancelled,
    Failed(PassError),
}

#[derive(Debug, Clone, PartialEq)]
enum PassState {
    Ready,
    Running,
    Suspended,
    Completed,
    Cancelled,
    Failed(PassError),
}

impl PassState {
    fn label(&self) -> &'static str {
        match self {
            PassState::Ready => "ready",
            PassState::Running => "running",
            PassState::Suspended => "suspended",
            PassState::Completed => "completed",
            PassState::Cancelled => "cancelled",
            PassState::Failed(_) => "failed",
        }
    }
}

enum Flow {
    Continue,
    Park,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pass State
// ─────────────────────────────────────────────────────────────────────────────

struct ExecutionPass {
    id: PassId,
    asset: Arc<BlueprintAsset>,
    state: PassState,
    /// Nodes waiting for a control-flow visit, FIFO
    queue: VecDeque<String>,
    /// Data outputs produced so far, keyed `node_id.pin_id`
    memo: HashMap<String, Value>,
    /// Mutable instance-scoped variables
    variables: HashMap<String, Value>,
    /// Read-only graph-scoped constants
    constants: Arc<HashMap<String, Value>>,
    /// Private per-node state slots
    node_state: HashMap<String, Value>,
    /// Body-advance counts per loop construct
    loop_iterations: HashMap<String, u32>,
    suspensions: HashMap<Uuid, SuspensionToken>,
    cancel: CancellationFlag,
    /// Node ids in visit order, for diagnostics
    trace: Vec<String>,
}

impl ExecutionPass {
    fn status(&self) -> PassStatus {
        match &self.state {
            PassState::Ready => PassStatus::Ready,
            PassState::Running => PassStatus::Running,
            PassState::Suspended => {
                let mut pending: Vec<SuspensionToken> = self.suspensions.values().cloned().collect();
                pending.sort_by_key(|t| t.id);
                PassStatus::Suspended { pending }
            }
            PassState::Completed => PassStatus::Completed,
            PassState::Cancelled => PassStatus::Cancelled,
            PassState::Failed(err) => PassStatus::Failed(err.clone()),
        }
    }

    fn finalize(&mut self, state: PassState) {
        self.queue.clear();
        self.suspensions.clear();
        self.state = state;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Engine-wide limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on body iterations for loop constructs that do not carry a
    /// `max_iterations` override
    pub max_loop_iterations: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 10_000,
        }
    }
}

/// Runs execution passes over composed assets
pub struct ExecutionEngine {
    registry: Arc<NodeTemplateRegistry>,
    config: EngineConfig,
    passes: DashMap<PassId, Arc<Mutex<ExecutionPass>>>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<NodeTemplateRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<NodeTemplateRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            passes: DashMap::new(),
        }
    }

    // ── Lifecycle ──

    /// Create a pass seeded at one of the asset's entry points
    ///
    /// `bindings` become the entry node's data outputs, so downstream nodes
    /// pull event payload fields exactly like any other node output.
    pub fn begin_pass(
        &self,
        asset: Arc<BlueprintAsset>,
        entry_node: &str,
        bindings: HashMap<String, Value>,
    ) -> Result<PassHandle, PassError> {
        if !asset.is_entry_point(entry_node) {
            return Err(PassError::NotEntryPoint {
                node_id: entry_node.to_string(),
            });
        }
        if asset.node(entry_node).is_none() {
            return Err(PassError::UnknownNode {
                node_id: entry_node.to_string(),
            });
        }

        let constants: HashMap<String, Value> = asset
            .graph_variables()
            .map(|v| (v.name.clone(), v.default.clone()))
            .collect();
        let variables: HashMap<String, Value> = asset
            .instance_variables()
            .map(|v| (v.name.clone(), v.default.clone()))
            .collect();
        let memo: HashMap<String, Value> = bindings
            .into_iter()
            .map(|(pin, value)| (pin_key(entry_node, &pin), value))
            .collect();

        let id = PassId(Uuid::new_v4());
        let cancel = CancellationFlag::default();
        let pass = ExecutionPass {
            id,
            asset,
            state: PassState::Ready,
            queue: VecDeque::from([entry_node.to_string()]),
            memo,
            variables,
            constants: Arc::new(constants),
            node_state: HashMap::new(),
            loop_iterations: HashMap::new(),
            suspensions: HashMap::new(),
            cancel: cancel.clone(),
            trace: Vec::new(),
        };
        debug!(pass_id = %id, entry_node, "pass created");
        self.passes.insert(id, Arc::new(Mutex::new(pass)));
        Ok(PassHandle { id, cancel })
    }

    /// Drive a freshly created pass until it completes, suspends, fails or
    /// observes cancellation
    pub async fn run(&self, handle: &PassHandle) -> Result<PassStatus, PassError> {
        let cell = self.pass_cell(handle)?;
        let mut pass = cell.lock().await;
        if pass.state != PassState::Ready {
            return Err(PassError::InvalidState {
                state: pass.state.label(),
                action: "run",
            });
        }
        Ok(self.drive(&mut pass).await)
    }

    /// Resolve one suspension and continue driving the pass
    ///
    /// `Ok(value)` feeds the token's output pin and advances its resume pin;
    /// `Err(reason)` fails the whole pass.
    pub async fn resume(
        &self,
        handle: &PassHandle,
        token: Uuid,
        outcome: Result<Value, String>,
    ) -> Result<PassStatus, PassError> {
        let cell = self.pass_cell(handle)?;
        let mut pass = cell.lock().await;
        if pass.state != PassState::Suspended {
            return Err(PassError::InvalidState {
                state: pass.state.label(),
                action: "resume",
            });
        }
        let suspension = pass
            .suspensions
            .remove(&token)
            .ok_or(PassError::UnknownSuspension { token })?;

        match outcome {
            Ok(value) => {
                if let Some(output_pin) = &suspension.output_pin {
                    pass.memo
                        .insert(pin_key(&suspension.node_id, output_pin), value);
                }
                let targets: Vec<String> = pass
                    .asset
                    .connections_out_of(&suspension.node_id, &suspension.resume_pin)
                    .map(|c| c.target_node.clone())
                    .collect();
                pass.queue.extend(targets);
                debug!(pass_id = %pass.id, node_id = %suspension.node_id, "pass resumed");
                Ok(self.drive(&mut pass).await)
            }
            Err(reason) => {
                warn!(pass_id = %pass.id, node_id = %suspension.node_id, %reason, "suspension failed");
                let err = PassError::Node {
                    node_id: suspension.node_id,
                    kind: "suspension".to_string(),
                    message: reason,
                };
                pass.finalize(PassState::Failed(err));
                Ok(pass.status())
            }
        }
    }

    /// Cancel a pass: parked passes transition immediately, running passes
    /// stop at their next node-visit boundary
    pub async fn cancel(&self, handle: &PassHandle) -> Result<PassStatus, PassError> {
        handle.cancel.cancel();
        let cell = self.pass_cell(handle)?;
        let mut pass = cell.lock().await;
        if matches!(pass.state, PassState::Ready | PassState::Suspended) {
            debug!(pass_id = %pass.id, "pass cancelled");
            pass.finalize(PassState::Cancelled);
        }
        Ok(pass.status())
    }

    pub async fn status(&self, handle: &PassHandle) -> Result<PassStatus, PassError> {
        let cell = self.pass_cell(handle)?;
        let pass = cell.lock().await;
        Ok(pass.status())
    }

    /// Node ids in the order control flow visited them
    pub async fn trace(&self, handle: &PassHandle) -> Result<Vec<String>, PassError> {
        let cell = self.pass_cell(handle)?;
        let pass = cell.lock().await;
        Ok(pass.trace.clone())
    }

    /// A memoized data output of the pass, if the producer ran
    pub async fn output(
        &self,
        handle: &PassHandle,
        node_id: &str,
        pin_id: &str,
    ) -> Result<Option<Value>, PassError> {
        let cell = self.pass_cell(handle)?;
        let pass = cell.lock().await;
        Ok(pass.memo.get(&pin_key(node_id, pin_id)).cloned())
    }

    /// Current value of an instance variable
    pub async fn variable(
        &self,
        handle: &PassHandle,
        name: &str,
    ) -> Result<Option<Value>, PassError> {
        let cell = self.pass_cell(handle)?;
        let pass = cell.lock().await;
        Ok(pass.variables.get(name).cloned())
    }

    /// Drop all bookkeeping for a finished pass
    pub fn release(&self, handle: &PassHandle) {
        self.passes.remove(&handle.id);
    }

    pub fn active_passes(&self) -> usize {
        self.passes.len()
    }

    fn pass_cell(&self, handle: &PassHandle) -> Result<Arc<Mutex<ExecutionPass>>, PassError> {
        self.passes
            .get(&handle.id)
            .map(|e| e.value().clone())
            .ok_or(PassError::UnknownPass { pass_id: handle.id.0 })
    }

    // ── Control Flow ──

    async fn drive(&self, pass: &mut ExecutionPass) -> PassStatus {
        pass.state = PassState::Running;
        loop {
            if pass.cancel.is_cancelled() {
                debug!(pass_id = %pass.id, "cancellation observed");
                pass.finalize(PassState::Cancelled);
                break;
            }
            let Some(node_id) = pass.queue.pop_front() else {
                pass.state = if pass.suspensions.is_empty() {
                    PassState::Completed
                } else {
                    // Unreachable with the current park-on-suspend flow, but
                    // a pass with live tokens must never report completed
                    PassState::Suspended
                };
                break;
            };
            match self.visit(pass, &node_id).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Park) => {
                    pass.state = PassState::Suspended;
                    break;
                }
                Err(err) => {
                    warn!(pass_id = %pass.id, node_id, error = %err, "pass failed");
                    pass.finalize(PassState::Failed(err));
                    break;
                }
            }
        }
        pass.status()
    }

    async fn visit(&self, pass: &mut ExecutionPass, node_id: &str) -> Result<Flow, PassError> {
        pass.trace.push(node_id.to_string());
        let asset = pass.asset.clone();
        let node = asset.node(node_id).ok_or_else(|| PassError::UnknownNode {
            node_id: node_id.to_string(),
        })?;
        let template =
            self.registry
                .template(&node.template_id)
                .map_err(|_| PassError::UnknownTemplate {
                    template_id: node.template_id.clone(),
                })?;
        let executor =
            self.registry
                .executor(&node.template_id)
                .map_err(|_| PassError::UnknownTemplate {
                    template_id: node.template_id.clone(),
                })?;

        let mut inputs = HashMap::new();
        for pin in template.data_inputs() {
            let mut visiting = HashSet::new();
            let value = self.resolve_data_input(pass, node, pin, &mut visiting).await?;
            inputs.insert(pin.id.clone(), value);
        }

        let mut ctx = NodeContext::new(
            node.id.clone(),
            node.template_id.clone(),
            inputs,
            node.overrides.clone(),
            std::mem::take(&mut pass.variables),
            pass.constants.clone(),
            pass.node_state.get(&node.id).cloned().unwrap_or(Value::Null),
        );
        let result = executor.execute(&mut ctx).await;
        pass.variables = std::mem::take(&mut ctx.variables);
        pass.node_state.insert(node.id.clone(), ctx.state.clone());
        for (pin, value) in ctx.take_outputs() {
            pass.memo.insert(pin_key(&node.id, &pin), value);
        }

        match result {
            ExecutionResult::Advance(pin) => {
                self.advance(pass, node, template.loop_construct, &pin)?;
                Ok(Flow::Continue)
            }
            ExecutionResult::AdvanceMultiple(pins) => {
                for pin in pins {
                    self.advance(pass, node, template.loop_construct, &pin)?;
                }
                Ok(Flow::Continue)
            }
            ExecutionResult::Complete => Ok(Flow::Continue),
            ExecutionResult::Suspend(token) => {
                debug!(pass_id = %pass.id, node_id = %node.id, token = %token.id, "pass suspended");
                pass.suspensions.insert(token.id, token);
                Ok(Flow::Park)
            }
            ExecutionResult::Fail { kind, message } => Err(PassError::Node {
                node_id: node.id.clone(),
                kind,
                message,
            }),
        }
    }

    /// Enqueue the targets of one control output; for a loop construct's
    /// body pin this also counts the iteration, invalidates stale memo in
    /// the body and re-enqueues the loop node behind its body
    fn advance(
        &self,
        pass: &mut ExecutionPass,
        node: &BlueprintNode,
        loop_construct: bool,
        pin: &str,
    ) -> Result<(), PassError> {
        let asset = pass.asset.clone();
        if loop_construct && pin == LOOP_BODY_PIN {
            let bound = node
                .overrides
                .get("max_iterations")
                .and_then(Value::as_int)
                .map(|i| i.max(0) as u32)
                .unwrap_or(self.config.max_loop_iterations);
            let count = pass.loop_iterations.entry(node.id.clone()).or_insert(0);
            *count += 1;
            if *count > bound {
                return Err(PassError::LoopBoundExceeded {
                    node_id: node.id.clone(),
                    bound,
                });
            }

            // Drop exactly the body members' cached outputs; node ids are
            // author-chosen strings, so key-prefix matching would clobber a
            // node whose id extends another's with a dot segment
            for member in asset.loop_body(&node.id) {
                let Some(member_node) = asset.node(member) else {
                    continue;
                };
                let Ok(template) = self.registry.template(&member_node.template_id) else {
                    continue;
                };
                for out_pin in template.data_outputs() {
                    pass.memo.remove(&pin_key(member, &out_pin.id));
                }
            }

            for conn in asset.connections_out_of(&node.id, pin) {
                pass.queue.push_back(conn.target_node.clone());
            }
            pass.queue.push_back(node.id.clone());
        } else {
            for conn in asset.connections_out_of(&node.id, pin) {
                pass.queue.push_back(conn.target_node.clone());
            }
        }
        Ok(())
    }

    // ── Data Flow ──

    async fn resolve_data_input(
        &self,
        pass: &mut ExecutionPass,
        node: &BlueprintNode,
        pin: &Pin,
        visiting: &mut HashSet<String>,
    ) -> Result<Value, PassError> {
        let asset = pass.asset.clone();
        if let Some(conn) = asset.connection_into(&node.id, &pin.id) {
            return self
                .pull_output(pass, &conn.source_node, &conn.source_pin, visiting)
                .await;
        }
        if let Some(value) = node.overrides.get(&pin.id) {
            return Ok(value.clone());
        }
        if let Some(default) = &pin.default {
            return Ok(default.clone());
        }
        Ok(Value::Null)
    }

    /// Demand-driven pull of one data output
    ///
    /// Memo hits return immediately. A miss on a pure producer evaluates it
    /// on the spot (recursively pulling its own inputs); a miss on an impure
    /// producer that has not run yet yields Null, since only control flow may
    /// execute impure nodes.
    fn pull_output<'a>(
        &'a self,
        pass: &'a mut ExecutionPass,
        producer_id: &'a str,
        pin_id: &'a str,
        visiting: &'a mut HashSet<String>,
    ) -> ValueFuture<'a> {
        Box::pin(async move {
            let key = pin_key(producer_id, pin_id);
            if let Some(value) = pass.memo.get(&key) {
                return Ok(value.clone());
            }

            let asset = pass.asset.clone();
            let node = asset
                .node(producer_id)
                .ok_or_else(|| PassError::UnknownNode {
                    node_id: producer_id.to_string(),
                })?;
            let template =
                self.registry
                    .template(&node.template_id)
                    .map_err(|_| PassError::UnknownTemplate {
                        template_id: node.template_id.clone(),
                    })?;
            if !template.is_pure() {
                return Ok(Value::Null);
            }
            if !visiting.insert(producer_id.to_string()) {
                return Err(PassError::DataCycle {
                    node_id: producer_id.to_string(),
                    pin_id: pin_id.to_string(),
                });
            }

            let mut inputs = HashMap::new();
            for input_pin in template.data_inputs() {
                let value = self
                    .resolve_data_input(pass, node, input_pin, visiting)
                    .await?;
                inputs.insert(input_pin.id.clone(), value);
            }

            let executor = self.registry.executor(&node.template_id).map_err(|_| {
                PassError::UnknownTemplate {
                    template_id: node.template_id.clone(),
                }
            })?;
            let mut ctx = NodeContext::new(
                node.id.clone(),
                node.template_id.clone(),
                inputs,
                node.overrides.clone(),
                std::mem::take(&mut pass.variables),
                pass.constants.clone(),
                pass.node_state.get(&node.id).cloned().unwrap_or(Value::Null),
            );
            let result = executor.execute(&mut ctx).await;
            pass.variables = std::mem::take(&mut ctx.variables);
            pass.node_state.insert(node.id.clone(), ctx.state.clone());
            for (pin, value) in ctx.take_outputs() {
                pass.memo.insert(pin_key(&node.id, &pin), value);
            }
            visiting.remove(producer_id);

            if let ExecutionResult::Fail { kind, message } = result {
                return Err(PassError::Node {
                    node_id: node.id.clone(),
                    kind,
                    message,
                });
            }
            Ok(pass.memo.get(&key).cloned().unwrap_or(Value::Null))
        })
    }
}
