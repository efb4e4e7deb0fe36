//! Predicate handlers
//!
//! Error discipline differs per combinator and is deliberate:
//!
//! - **AND** fails closed: a failing operand makes the whole conjunction
//!   `false`, and nothing after it is evaluated.
//! - **OR** only needs one truthy operand, so a failing operand is skipped
//!   and evaluation continues.
//! - **XOR** and **NOT** have no fallback semantics; their operand errors
//!   propagate.
//!
//! Operands always evaluate in listed order, with short-circuiting where the
//! boolean result is already decided.

use super::value::{eval_property, eval_property_sync, is_truthy};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, PredicateKind, PropertyValue};
use crate::error::{CompileError, CompileResult, ThunkResult};
use crate::eval::EvalContext;
use crate::functions::FunctionCall;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::warn;

enum Condition {
    /// Registered condition invoked with the subject alone
    Name(String),
    /// function.condition node: name plus extra arguments
    Node {
        name: String,
        arguments: Vec<PropertyValue>,
    },
}

/// Evaluates `predicate.test` nodes
pub struct TestHandler {
    id: NodeId,
    subject: PropertyValue,
    condition: Condition,
    negate: bool,
}

impl TestHandler {
    /// Build from a test node
    pub fn new(node: &AstNode, nodes: &NodeRegistry) -> CompileResult<Self> {
        let subject = node
            .property("subject")
            .cloned()
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "predicate.test has no subject".to_string(),
            })?;

        let condition = match node.property("condition") {
            Some(PropertyValue::Literal(Value::String(name))) => Condition::Name(name.clone()),
            Some(PropertyValue::Node(id)) => {
                let function = nodes.get(id).ok_or_else(|| CompileError::InvalidDefinition {
                    path: id.to_string(),
                    message: "condition references an unregistered node".to_string(),
                })?;
                let name = function
                    .string("name")
                    .ok_or_else(|| CompileError::InvalidDefinition {
                        path: id.to_string(),
                        message: "condition function has no name".to_string(),
                    })?
                    .to_string();
                let arguments = match function.property("arguments") {
                    Some(PropertyValue::List(items)) => items.clone(),
                    Some(single) => vec![single.clone()],
                    None => Vec::new(),
                };
                Condition::Node { name, arguments }
            }
            _ => {
                return Err(CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "predicate.test has no usable condition".to_string(),
                })
            }
        };

        Ok(Self {
            id: node.id.clone(),
            subject,
            condition,
            negate: node.boolean("negate").unwrap_or(false),
        })
    }

    fn condition_name(&self) -> &str {
        match &self.condition {
            Condition::Name(name) => name,
            Condition::Node { name, .. } => name,
        }
    }
}

#[async_trait]
impl ThunkHandler for TestHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let subject = eval_property(cx, &self.subject).await?;

        let mut args = vec![subject];
        if let Condition::Node { arguments, .. } = &self.condition {
            let extra = join_all(arguments.iter().map(|arg| eval_property(cx, arg))).await;
            args.extend(extra.into_iter().map(|o| o.unwrap_or(Value::Null)));
        }

        let verdict = cx
            .functions()
            .call(
                self.condition_name(),
                FunctionCall {
                    args,
                    effect: None,
                },
            )
            .await?;
        Ok(Value::Bool(is_truthy(&verdict) != self.negate))
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        let subject = match eval_property_sync(cx, &self.subject) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let mut args = vec![subject];
        if let Condition::Node { arguments, .. } = &self.condition {
            for arg in arguments {
                args.push(eval_property_sync(cx, arg).unwrap_or(Value::Null));
            }
        }
        let verdict = cx
            .functions()
            .call_sync(self.condition_name(), FunctionCall { args, effect: None })?;
        Some(verdict.map(|v| Value::Bool(is_truthy(&v) != self.negate)))
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async || probe.functions.is_async(self.condition_name())
    }
}

/// Evaluates AND / OR / XOR combinators
pub struct CombinatorHandler {
    id: NodeId,
    kind: PredicateKind,
    operands: Vec<NodeId>,
}

impl CombinatorHandler {
    /// Build from a combinator node
    pub fn new(node: &AstNode, kind: PredicateKind) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            kind,
            operands: node.node_items("operands"),
        })
    }
}

#[async_trait]
impl ThunkHandler for CombinatorHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        match self.kind {
            PredicateKind::And => {
                for operand in &self.operands {
                    match cx.invoke(operand).await {
                        Ok(value) if is_truthy(&value) => continue,
                        Ok(_) => return Ok(Value::Bool(false)),
                        Err(e) => {
                            warn!(node = %self.id, error = %e, "AND operand failed, closing");
                            return Ok(Value::Bool(false));
                        }
                    }
                }
                Ok(Value::Bool(true))
            }
            PredicateKind::Or => {
                for operand in &self.operands {
                    match cx.invoke(operand).await {
                        Ok(value) if is_truthy(&value) => return Ok(Value::Bool(true)),
                        Ok(_) => continue,
                        Err(e) => {
                            // OR needs only one truthy operand; keep looking.
                            warn!(node = %self.id, error = %e, "OR operand failed, skipping");
                            continue;
                        }
                    }
                }
                Ok(Value::Bool(false))
            }
            PredicateKind::Xor => {
                let mut parity = false;
                for operand in &self.operands {
                    parity ^= is_truthy(&cx.invoke(operand).await?);
                }
                Ok(Value::Bool(parity))
            }
            _ => unreachable!("combinator handler only compiles for AND/OR/XOR"),
        }
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        Some(match self.kind {
            PredicateKind::And => {
                let mut verdict = true;
                for operand in &self.operands {
                    match cx.invoke_sync(operand) {
                        Ok(value) if is_truthy(&value) => continue,
                        _ => {
                            verdict = false;
                            break;
                        }
                    }
                }
                Ok(Value::Bool(verdict))
            }
            PredicateKind::Or => {
                let mut verdict = false;
                for operand in &self.operands {
                    if matches!(cx.invoke_sync(operand), Ok(value) if is_truthy(&value)) {
                        verdict = true;
                        break;
                    }
                }
                Ok(Value::Bool(verdict))
            }
            PredicateKind::Xor => {
                let mut parity = false;
                for operand in &self.operands {
                    match cx.invoke_sync(operand) {
                        Ok(value) => parity ^= is_truthy(&value),
                        Err(e) => return Some(Err(e)),
                    }
                }
                Ok(Value::Bool(parity))
            }
            _ => unreachable!("combinator handler only compiles for AND/OR/XOR"),
        })
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}

/// Evaluates NOT
pub struct NotHandler {
    id: NodeId,
    operand: NodeId,
}

impl NotHandler {
    /// Build from a NOT node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        let operand = node
            .node("operand")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "predicate.not has no operand".to_string(),
            })?
            .clone();
        Ok(Self {
            id: node.id.clone(),
            operand,
        })
    }
}

#[async_trait]
impl ThunkHandler for NotHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let value = cx.invoke(&self.operand).await?;
        Ok(Value::Bool(!is_truthy(&value)))
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        Some(
            cx.invoke_sync(&self.operand)
                .map(|value| Value::Bool(!is_truthy(&value))),
        )
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}
