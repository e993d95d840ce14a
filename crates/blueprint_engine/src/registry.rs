//! Node template registry: the append-only table mapping template ids to
//! their pin contracts and executors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use blueprint_graph::NodeTemplate;

use crate::context::{ExecutionResult, NodeContext};
use crate::error::RegistryError;

// ─────────────────────────────────────────────────────────────────────────────
// Executor Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Behaviour of a node template
///
/// Executors are shared across passes and nodes, so they hold no per-visit
/// state; everything mutable lives on the [`NodeContext`].
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, ctx: &mut NodeContext) -> ExecutionResult;
}

/// Executor backed by a plain function, for nodes that never await
pub struct FnNodeExecutor {
    func: Box<dyn Fn(&mut NodeContext) -> ExecutionResult + Send + Sync>,
}

impl FnNodeExecutor {
    pub fn new(
        func: impl Fn(&mut NodeContext) -> ExecutionResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            func: Box::new(func),
        }
    }
}

#[async_trait]
impl NodeExecutor for FnNodeExecutor {
    async fn execute(&self, ctx: &mut NodeContext) -> ExecutionResult {
        (self.func)(ctx)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct TemplateEntry {
    template: Arc<NodeTemplate>,
    executor: Arc<dyn NodeExecutor>,
}

/// Append-only registry of node templates
///
/// Populated during startup, then frozen behind an `Arc` and shared by the
/// composer and every execution pass. Registering the same template id twice
/// is an error rather than a silent replace, so composed assets can trust
/// that a template id means the same contract for the whole process lifetime.
#[derive(Default)]
pub struct NodeTemplateRegistry {
    entries: HashMap<String, TemplateEntry>,
}

impl NodeTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        template: NodeTemplate,
        executor: Arc<dyn NodeExecutor>,
    ) -> Result<(), RegistryError> {
        template.validate()?;
        if self.entries.contains_key(&template.template_id) {
            return Err(RegistryError::AlreadyRegistered {
                template_id: template.template_id.clone(),
            });
        }
        debug!(template_id = %template.template_id, "registered node template");
        self.entries.insert(
            template.template_id.clone(),
            TemplateEntry {
                template: Arc::new(template),
                executor,
            },
        );
        Ok(())
    }

    /// Register with a plain function executor
    pub fn register_fn(
        &mut self,
        template: NodeTemplate,
        func: impl Fn(&mut NodeContext) -> ExecutionResult + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        self.register(template, Arc::new(FnNodeExecutor::new(func)))
    }

    pub fn template(&self, template_id: &str) -> Result<Arc<NodeTemplate>, RegistryError> {
        self.entries
            .get(template_id)
            .map(|e| e.template.clone())
            .ok_or_else(|| RegistryError::UnknownTemplate {
                template_id: template_id.to_string(),
            })
    }

    pub fn executor(&self, template_id: &str) -> Result<Arc<dyn NodeExecutor>, RegistryError> {
        self.entries
            .get(template_id)
            .map(|e| e.executor.clone())
            .ok_or_else(|| RegistryError::UnknownTemplate {
                template_id: template_id.to_string(),
            })
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.entries.contains_key(template_id)
    }

    pub fn template_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_graph::{DataType, Pin};

    fn noop_template(id: &str) -> NodeTemplate {
        NodeTemplate {
            template_id: id.to_string(),
            name: id.to_string(),
            category: "Test".to_string(),
            loop_construct: false,
            pins: vec![Pin::control_in(), Pin::control_out("then")],
            description: None,
        }
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut reg = NodeTemplateRegistry::new();
        reg.register_fn(noop_template("t/Noop"), |_| ExecutionResult::advance("then"))
            .unwrap();
        let err = reg
            .register_fn(noop_template("t/Noop"), |_| ExecutionResult::Complete)
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
        // The first registration survives
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn invalid_template_rejected_at_registration() {
        let mut reg = NodeTemplateRegistry::new();
        let mut broken = noop_template("t/Broken");
        broken.pins.push(Pin::data_in("x", DataType::None));
        let err = reg
            .register_fn(broken, |_| ExecutionResult::Complete)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(_)));
    }

    #[test]
    fn unknown_template_lookup() {
        let reg = NodeTemplateRegistry::new();
        assert!(matches!(
            reg.template("t/Missing"),
            Err(RegistryError::UnknownTemplate { .. })
        ));
    }
}
