//! Trigger system: routes host events to blueprint execution passes.
//!
//! Bindings pair an event-type pattern with a composed asset and one of its
//! entry points. Dispatching an event begins a fresh pass per matching
//! binding, with the event payload flattened into the entry node's data
//! outputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use wildmatch::WildMatch;

use blueprint_graph::{BlueprintAsset, Value};

use crate::engine::{ExecutionEngine, PassHandle, PassStatus};
use crate::error::TriggerError;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// An event emitted by the host simulation
#[derive(Debug, Clone)]
pub struct GameEvent {
    /// Dotted event type, e.g. "npc.spawned" or "region.weather.changed"
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl GameEvent {
    pub fn new(event_type: &str, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Glob-style matcher over event types ("npc.*" matches "npc.spawned")
#[derive(Debug, Clone)]
pub struct EventMatcher {
    pattern: WildMatch,
    raw: String,
}

impl EventMatcher {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: WildMatch::new(pattern),
            raw: pattern.to_string(),
        }
    }

    pub fn matches(&self, event_type: &str) -> bool {
        self.pattern.matches(event_type)
    }

    pub fn pattern(&self) -> &str {
        &self.raw
    }
}

/// Identifier of one trigger binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerId(pub Uuid);

impl std::fmt::Display for TriggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct TriggerBinding {
    id: TriggerId,
    matcher: EventMatcher,
    asset: Arc<BlueprintAsset>,
    entry_node: String,
    cooldown: Option<Duration>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Trigger System
// ─────────────────────────────────────────────────────────────────────────────

/// Event-to-pass router with optional per-binding cooldowns
pub struct TriggerSystem {
    engine: Arc<ExecutionEngine>,
    bindings: RwLock<Vec<TriggerBinding>>,
    last_fired: Mutex<HashMap<TriggerId, Instant>>,
}

impl TriggerSystem {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            engine,
            bindings: RwLock::new(Vec::new()),
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    /// Bind an event pattern to an entry point of a composed asset
    pub fn register(
        &self,
        matcher: EventMatcher,
        asset: Arc<BlueprintAsset>,
        entry_node: &str,
        cooldown: Option<Duration>,
    ) -> Result<TriggerId, TriggerError> {
        if !asset.is_entry_point(entry_node) {
            return Err(TriggerError::UnknownEntryPoint {
                node_id: entry_node.to_string(),
            });
        }
        let id = TriggerId(Uuid::new_v4());
        debug!(trigger_id = %id, pattern = matcher.pattern(), entry_node, "trigger registered");
        self.bindings.write().push(TriggerBinding {
            id,
            matcher,
            asset,
            entry_node: entry_node.to_string(),
            cooldown,
        });
        Ok(id)
    }

    pub fn unregister(&self, id: TriggerId) -> Result<(), TriggerError> {
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|b| b.id != id);
        if bindings.len() == before {
            return Err(TriggerError::UnknownBinding { trigger_id: id.0 });
        }
        self.last_fired.lock().remove(&id);
        Ok(())
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.read().len()
    }

    /// Begin one pass per matching binding (cooldowns permitting) without
    /// driving any of them; the host decides when each pass runs
    pub fn dispatch(&self, event: &GameEvent) -> Vec<PassHandle> {
        let bindings = self.eligible_bindings(event);
        let seed = event_bindings(event);
        let mut handles = Vec::with_capacity(bindings.len());
        for (id, asset, entry_node) in bindings {
            match self
                .engine
                .begin_pass(asset, &entry_node, seed.clone())
            {
                Ok(handle) => {
                    debug!(trigger_id = %id, pass_id = %handle.id, event_type = %event.event_type, "trigger fired");
                    handles.push(handle);
                }
                Err(err) => {
                    warn!(trigger_id = %id, error = %err, "trigger could not begin pass");
                }
            }
        }
        handles
    }

    /// Dispatch and drive every started pass to its first stop
    pub async fn dispatch_and_run(&self, event: &GameEvent) -> Vec<(PassHandle, PassStatus)> {
        let handles = self.dispatch(event);
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match self.engine.run(&handle).await {
                Ok(status) => results.push((handle, status)),
                Err(err) => {
                    warn!(pass_id = %handle.id, error = %err, "triggered pass could not run");
                }
            }
        }
        results
    }

    /// Matching bindings whose cooldown window has elapsed; firing here
    /// stamps the cooldown clock
    fn eligible_bindings(&self, event: &GameEvent) -> Vec<(TriggerId, Arc<BlueprintAsset>, String)> {
        let now = Instant::now();
        let bindings = self.bindings.read();
        let mut last_fired = self.last_fired.lock();
        let mut eligible = Vec::new();
        for binding in bindings.iter() {
            if !binding.matcher.matches(&event.event_type) {
                continue;
            }
            if let Some(cooldown) = binding.cooldown {
                if let Some(last) = last_fired.get(&binding.id) {
                    if now.duration_since(*last) < cooldown {
                        debug!(trigger_id = %binding.id, event_type = %event.event_type, "trigger on cooldown");
                        continue;
                    }
                }
                last_fired.insert(binding.id, now);
            }
            eligible.push((
                binding.id,
                binding.asset.clone(),
                binding.entry_node.clone(),
            ));
        }
        eligible
    }
}

/// Flatten an event into entry-node data outputs: `event_type` plus one
/// binding per top-level payload field (or a single `payload` binding for
/// non-object payloads)
fn event_bindings(event: &GameEvent) -> HashMap<String, Value> {
    let mut bindings = HashMap::new();
    bindings.insert(
        "event_type".to_string(),
        Value::String(event.event_type.clone()),
    );
    match &event.payload {
        serde_json::Value::Object(fields) => {
            for (key, value) in fields {
                bindings.insert(key.clone(), Value::from(value.clone()));
            }
        }
        serde_json::Value::Null => {}
        other => {
            bindings.insert("payload".to_string(), Value::from(other.clone()));
        }
    }
    bindings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_globs() {
        let m = EventMatcher::new("npc.*");
        assert!(m.matches("npc.spawned"));
        assert!(m.matches("npc.died"));
        assert!(!m.matches("region.entered"));

        let exact = EventMatcher::new("npc.spawned");
        assert!(exact.matches("npc.spawned"));
        assert!(!exact.matches("npc.spawned.late"));
    }

    #[test]
    fn object_payloads_flatten_to_fields() {
        let event = GameEvent::new(
            "npc.spawned",
            serde_json::json!({ "health": 50.0, "name": "grunt" }),
        );
        let bindings = event_bindings(&event);
        assert_eq!(
            bindings.get("event_type"),
            Some(&Value::String("npc.spawned".to_string()))
        );
        assert_eq!(bindings.get("health"), Some(&Value::Float(50.0)));
        assert_eq!(
            bindings.get("name"),
            Some(&Value::String("grunt".to_string()))
        );
    }

    #[test]
    fn scalar_payload_lands_under_payload() {
        let event = GameEvent::new("tick", serde_json::json!(42));
        let bindings = event_bindings(&event);
        assert_eq!(bindings.get("payload"), Some(&Value::Int(42)));
        assert_eq!(bindings.len(), 2);
    }
}
