//! Built-in node library: flow control, math, logic, variables and logging.
//!
//! Hosts extend the vocabulary by registering their own templates next to
//! these; nothing here is special-cased by the engine except the loop body
//! pin convention shared with the composer.

use blueprint_graph::{DataType, NodeTemplate, Pin, Value};
use tracing::info;

use crate::context::ExecutionResult;
use crate::error::RegistryError;
use crate::registry::NodeTemplateRegistry;

fn template(id: &str, name: &str, category: &str, pins: Vec<Pin>) -> NodeTemplate {
    NodeTemplate {
        template_id: id.to_string(),
        name: name.to_string(),
        category: category.to_string(),
        loop_construct: false,
        pins,
        description: None,
    }
}

/// Register the core node set
pub fn register_builtins(registry: &mut NodeTemplateRegistry) -> Result<(), RegistryError> {
    register_flow(registry)?;
    register_math(registry)?;
    register_logic(registry)?;
    register_variables(registry)?;

    registry.register_fn(
        template(
            "core/Log",
            "Log",
            "Debug",
            vec![
                Pin::control_in(),
                Pin::data_in_with_default("message", DataType::Wildcard, Value::from("")),
                Pin::control_out("then"),
            ],
        ),
        |ctx| {
            info!(node_id = %ctx.node_id, message = ?ctx.input("message"), "blueprint log");
            ExecutionResult::advance("then")
        },
    )?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Flow
// ─────────────────────────────────────────────────────────────────────────────

fn register_flow(registry: &mut NodeTemplateRegistry) -> Result<(), RegistryError> {
    registry.register_fn(
        template(
            "core/Event",
            "Event",
            "Flow",
            vec![Pin::control_out("fired")],
        ),
        |_ctx| ExecutionResult::advance("fired"),
    )?;

    registry.register_fn(
        template(
            "core/Branch",
            "Branch",
            "Flow",
            vec![
                Pin::control_in(),
                Pin::data_in_with_default("condition", DataType::Bool, Value::Bool(false)),
                Pin::control_out("then"),
                Pin::control_out("else"),
            ],
        ),
        |ctx| {
            if ctx.input_bool("condition").unwrap_or(false) {
                ExecutionResult::advance("then")
            } else {
                ExecutionResult::advance("else")
            }
        },
    )?;

    registry.register_fn(
        template(
            "core/Sequence",
            "Sequence",
            "Flow",
            vec![
                Pin::control_in(),
                Pin::control_out("then_0"),
                Pin::control_out("then_1"),
                Pin::control_out("then_2"),
                Pin::control_out("then_3"),
            ],
        ),
        |_ctx| {
            // Unconnected outputs simply have no targets to enqueue
            ExecutionResult::AdvanceMultiple(vec![
                "then_0".to_string(),
                "then_1".to_string(),
                "then_2".to_string(),
                "then_3".to_string(),
            ])
        },
    )?;

    let mut for_loop = template(
        "core/ForLoop",
        "For Loop",
        "Flow",
        vec![
            Pin::control_in(),
            Pin::data_in_with_default("count", DataType::Int, Value::Int(0)),
            Pin::control_out("body"),
            Pin::data_out("index", DataType::Int),
            Pin::control_out("completed"),
        ],
    );
    for_loop.loop_construct = true;
    registry.register_fn(for_loop, |ctx| {
        let index = ctx.state.as_int().unwrap_or(0);
        let count = ctx.input_int("count").unwrap_or(0);
        if index < count {
            ctx.set_output("index", index);
            ctx.state = Value::Int(index + 1);
            ExecutionResult::advance("body")
        } else {
            ctx.state = Value::Null;
            ExecutionResult::advance("completed")
        }
    })?;

    let mut while_loop = template(
        "core/WhileLoop",
        "While Loop",
        "Flow",
        vec![
            Pin::control_in(),
            Pin::data_in_with_default("condition", DataType::Bool, Value::Bool(false)),
            Pin::control_out("body"),
            Pin::control_out("completed"),
        ],
    );
    while_loop.loop_construct = true;
    registry.register_fn(while_loop, |ctx| {
        if ctx.input_bool("condition").unwrap_or(false) {
            ExecutionResult::advance("body")
        } else {
            ExecutionResult::advance("completed")
        }
    })?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Math
// ─────────────────────────────────────────────────────────────────────────────

fn binary_math(id: &str, name: &str, out: &'static str) -> NodeTemplate {
    template(
        id,
        name,
        "Math",
        vec![
            Pin::data_in("a", DataType::Float),
            Pin::data_in("b", DataType::Float),
            Pin::data_out(out, DataType::Float),
        ],
    )
}

fn register_math(registry: &mut NodeTemplateRegistry) -> Result<(), RegistryError> {
    registry.register_fn(binary_math("core/Add", "Add", "sum"), |ctx| {
        let a = ctx.input_float("a").unwrap_or(0.0);
        let b = ctx.input_float("b").unwrap_or(0.0);
        ctx.set_output("sum", a + b);
        ExecutionResult::Complete
    })?;

    registry.register_fn(binary_math("core/Subtract", "Subtract", "result"), |ctx| {
        let a = ctx.input_float("a").unwrap_or(0.0);
        let b = ctx.input_float("b").unwrap_or(0.0);
        ctx.set_output("result", a - b);
        ExecutionResult::Complete
    })?;

    registry.register_fn(binary_math("core/Multiply", "Multiply", "result"), |ctx| {
        let a = ctx.input_float("a").unwrap_or(0.0);
        let b = ctx.input_float("b").unwrap_or(0.0);
        ctx.set_output("result", a * b);
        ExecutionResult::Complete
    })?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Logic
// ─────────────────────────────────────────────────────────────────────────────

fn register_logic(registry: &mut NodeTemplateRegistry) -> Result<(), RegistryError> {
    registry.register_fn(
        template(
            "core/Compare",
            "Compare",
            "Logic",
            vec![
                Pin::data_in("a", DataType::Wildcard),
                Pin::data_in("b", DataType::Wildcard),
                Pin::data_out("result", DataType::Bool),
            ],
        ),
        |ctx| {
            let operator = ctx.override_str("operator").unwrap_or("==").to_string();
            let a = ctx.input("a");
            let b = ctx.input("b");
            let result = match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => match operator.as_str() {
                    "==" => x == y,
                    "!=" => x != y,
                    "<" => x < y,
                    "<=" => x <= y,
                    ">" => x > y,
                    ">=" => x >= y,
                    other => {
                        return ExecutionResult::fail(
                            "compare",
                            format!("unknown operator '{}'", other),
                        )
                    }
                },
                _ => match operator.as_str() {
                    "==" => a == b,
                    "!=" => a != b,
                    other => {
                        return ExecutionResult::fail(
                            "compare",
                            format!("operator '{}' needs numeric operands", other),
                        )
                    }
                },
            };
            ctx.set_output("result", result);
            ExecutionResult::Complete
        },
    )?;

    registry.register_fn(
        template(
            "core/Not",
            "Not",
            "Logic",
            vec![
                Pin::data_in("value", DataType::Bool),
                Pin::data_out("result", DataType::Bool),
            ],
        ),
        |ctx| {
            let value = ctx.input_bool("value").unwrap_or(false);
            ctx.set_output("result", !value);
            ExecutionResult::Complete
        },
    )?;

    let binary_bool = |id: &str, name: &str| {
        template(
            id,
            name,
            "Logic",
            vec![
                Pin::data_in("a", DataType::Bool),
                Pin::data_in("b", DataType::Bool),
                Pin::data_out("result", DataType::Bool),
            ],
        )
    };

    registry.register_fn(binary_bool("core/And", "And"), |ctx| {
        let a = ctx.input_bool("a").unwrap_or(false);
        let b = ctx.input_bool("b").unwrap_or(false);
        ctx.set_output("result", a && b);
        ExecutionResult::Complete
    })?;

    registry.register_fn(binary_bool("core/Or", "Or"), |ctx| {
        let a = ctx.input_bool("a").unwrap_or(false);
        let b = ctx.input_bool("b").unwrap_or(false);
        ctx.set_output("result", a || b);
        ExecutionResult::Complete
    })?;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Variables
// ─────────────────────────────────────────────────────────────────────────────

fn register_variables(registry: &mut NodeTemplateRegistry) -> Result<(), RegistryError> {
    registry.register_fn(
        template(
            "core/GetVariable",
            "Get Variable",
            "Variables",
            vec![Pin::data_out("value", DataType::Wildcard)],
        ),
        |ctx| {
            let Some(name) = ctx.override_str("variable").map(str::to_string) else {
                return ExecutionResult::fail("variable", "missing 'variable' override");
            };
            let value = ctx.variable(&name).unwrap_or(Value::Null);
            ctx.set_output("value", value);
            ExecutionResult::Complete
        },
    )?;

    registry.register_fn(
        template(
            "core/SetVariable",
            "Set Variable",
            "Variables",
            vec![
                Pin::control_in(),
                Pin::data_in("value", DataType::Wildcard),
                Pin::control_out("then"),
            ],
        ),
        |ctx| {
            let Some(name) = ctx.override_str("variable").map(str::to_string) else {
                return ExecutionResult::fail("variable", "missing 'variable' override");
            };
            if ctx.is_constant(&name) {
                return ExecutionResult::fail(
                    "variable",
                    format!("graph variable '{}' is read-only", name),
                );
            }
            let value = ctx.input("value");
            ctx.set_variable(&name, value);
            ExecutionResult::advance("then")
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeContext;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;

    fn registry() -> NodeTemplateRegistry {
        let mut reg = NodeTemplateRegistry::new();
        register_builtins(&mut reg).unwrap();
        reg
    }

    fn ctx_for(template_id: &str, inputs: Vec<(&str, Value)>) -> NodeContext {
        NodeContext::new(
            "n".to_string(),
            template_id.to_string(),
            inputs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            BTreeMap::new(),
            HashMap::new(),
            Arc::new(HashMap::new()),
            Value::Null,
        )
    }

    #[tokio::test]
    async fn branch_picks_the_right_pin() {
        let reg = registry();
        let executor = reg.executor("core/Branch").unwrap();

        let mut ctx = ctx_for("core/Branch", vec![("condition", Value::Bool(true))]);
        assert!(matches!(
            executor.execute(&mut ctx).await,
            ExecutionResult::Advance(pin) if pin == "then"
        ));

        let mut ctx = ctx_for("core/Branch", vec![("condition", Value::Bool(false))]);
        assert!(matches!(
            executor.execute(&mut ctx).await,
            ExecutionResult::Advance(pin) if pin == "else"
        ));
    }

    #[tokio::test]
    async fn add_sums_floats() {
        let reg = registry();
        let executor = reg.executor("core/Add").unwrap();
        let mut ctx = ctx_for(
            "core/Add",
            vec![("a", Value::Float(2.0)), ("b", Value::Int(3))],
        );
        executor.execute(&mut ctx).await;
        assert_eq!(ctx.take_outputs().get("sum"), Some(&Value::Float(5.0)));
    }

    #[tokio::test]
    async fn for_loop_counts_through_its_state_slot() {
        let reg = registry();
        let executor = reg.executor("core/ForLoop").unwrap();
        let mut ctx = ctx_for("core/ForLoop", vec![("count", Value::Int(2))]);

        // Two body iterations, then completed
        for expected in 0..2 {
            let result = executor.execute(&mut ctx).await;
            assert!(matches!(result, ExecutionResult::Advance(ref p) if p == "body"));
            assert_eq!(
                ctx.take_outputs().get("index"),
                Some(&Value::Int(expected))
            );
        }
        let result = executor.execute(&mut ctx).await;
        assert!(matches!(result, ExecutionResult::Advance(ref p) if p == "completed"));
    }

    #[tokio::test]
    async fn compare_handles_mixed_numerics() {
        let reg = registry();
        let executor = reg.executor("core/Compare").unwrap();
        let mut ctx = ctx_for(
            "core/Compare",
            vec![("a", Value::Int(3)), ("b", Value::Float(3.5))],
        );
        ctx.overrides
            .insert("operator".to_string(), Value::from("<"));
        executor.execute(&mut ctx).await;
        assert_eq!(ctx.take_outputs().get("result"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn set_variable_refuses_graph_constants() {
        let reg = registry();
        let executor = reg.executor("core/SetVariable").unwrap();
        let mut constants = HashMap::new();
        constants.insert("threshold".to_string(), Value::Float(10.0));
        let mut ctx = NodeContext::new(
            "n".to_string(),
            "core/SetVariable".to_string(),
            HashMap::from([("value".to_string(), Value::Float(1.0))]),
            BTreeMap::from([(
                "variable".to_string(),
                Value::from("threshold"),
            )]),
            HashMap::new(),
            Arc::new(constants),
            Value::Null,
        );
        assert!(matches!(
            executor.execute(&mut ctx).await,
            ExecutionResult::Fail { kind, .. } if kind == "variable"
        ));
    }

    #[test]
    fn all_builtin_templates_validate() {
        let reg = registry();
        for id in reg.template_ids() {
            reg.template(&id).unwrap().validate().unwrap();
        }
    }
}
