//! Pipeline and conditional handlers
//!
//! A pipeline folds its steps left to right: the running value is the first
//! argument of every step function, followed by that step's own evaluated
//! arguments. An empty step list returns the input unchanged; a failing step
//! wraps the failure with the step's position and name.
//!
//! A conditional evaluates its predicate and picks `thenValue` / `elseValue`,
//! defaulting to `true` / `false` when a side is omitted.

use super::value::{eval_property, eval_property_sync, is_truthy};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, PropertyValue};
use crate::error::{CompileError, CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use crate::functions::FunctionCall;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

/// One pipeline step, pre-extracted from its function node
struct StepSpec {
    name: String,
    arguments: Vec<PropertyValue>,
}

impl StepSpec {
    fn from_node(id: &NodeId, nodes: &NodeRegistry) -> CompileResult<Self> {
        let node = nodes.get(id).ok_or_else(|| CompileError::InvalidDefinition {
            path: id.to_string(),
            message: "pipeline step references an unregistered node".to_string(),
        })?;
        let name = node
            .string("name")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: id.to_string(),
                message: "pipeline step function has no name".to_string(),
            })?
            .to_string();
        let arguments = match node.property("arguments") {
            Some(PropertyValue::List(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        Ok(Self { name, arguments })
    }

    async fn arguments(&self, cx: &EvalContext) -> Vec<Value> {
        join_all(self.arguments.iter().map(|arg| eval_property(cx, arg)))
            .await
            .into_iter()
            .map(|outcome| outcome.unwrap_or(Value::Null))
            .collect()
    }
}

/// Evaluates pipeline expressions
pub struct PipelineHandler {
    id: NodeId,
    input: Option<PropertyValue>,
    steps: Vec<StepSpec>,
}

impl PipelineHandler {
    /// Build from a pipeline node, resolving step specs eagerly
    pub fn new(node: &AstNode, nodes: &NodeRegistry) -> CompileResult<Self> {
        let steps = node
            .node_items("steps")
            .iter()
            .map(|id| StepSpec::from_node(id, nodes))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Self {
            id: node.id.clone(),
            input: node.property("input").cloned(),
            steps,
        })
    }
}

#[async_trait]
impl ThunkHandler for PipelineHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let mut value = match &self.input {
            Some(input) => eval_property(cx, input).await?,
            None => Value::Null,
        };

        for (index, step) in self.steps.iter().enumerate() {
            let mut args = vec![value];
            args.extend(step.arguments(cx).await);
            value = cx
                .functions()
                .call(&step.name, FunctionCall { args, effect: None })
                .await
                .map_err(|e| {
                    ThunkError::evaluation_failed(format!(
                        "pipeline step {index} ('{}') failed: {}",
                        step.name, e.message
                    ))
                })?;
        }
        Ok(value)
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        let mut value = match &self.input {
            Some(input) => match eval_property_sync(cx, input) {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            },
            None => Value::Null,
        };
        for (index, step) in self.steps.iter().enumerate() {
            let mut args = vec![value];
            for arg in &step.arguments {
                args.push(eval_property_sync(cx, arg).unwrap_or(Value::Null));
            }
            let outcome = cx
                .functions()
                .call_sync(&step.name, FunctionCall { args, effect: None })?;
            value = match outcome {
                Ok(v) => v,
                Err(e) => {
                    return Some(Err(ThunkError::evaluation_failed(format!(
                        "pipeline step {index} ('{}') failed: {}",
                        step.name, e.message
                    ))))
                }
            };
        }
        Some(Ok(value))
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async || self.steps.iter().any(|s| probe.functions.is_async(&s.name))
    }
}

/// Evaluates conditional expressions
pub struct ConditionalHandler {
    id: NodeId,
    predicate: NodeId,
    then_value: Option<PropertyValue>,
    else_value: Option<PropertyValue>,
}

impl ConditionalHandler {
    /// Build from a conditional node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        let predicate = node
            .node("predicate")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "conditional has no predicate node".to_string(),
            })?
            .clone();
        Ok(Self {
            id: node.id.clone(),
            predicate,
            then_value: node.property("thenValue").cloned(),
            else_value: node.property("elseValue").cloned(),
        })
    }
}

#[async_trait]
impl ThunkHandler for ConditionalHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let chosen = is_truthy(&cx.invoke(&self.predicate).await?);
        match (chosen, &self.then_value, &self.else_value) {
            (true, Some(value), _) => eval_property(cx, value).await,
            (true, None, _) => Ok(Value::Bool(true)),
            (false, _, Some(value)) => eval_property(cx, value).await,
            (false, _, None) => Ok(Value::Bool(false)),
        }
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        let predicate = match cx.invoke_sync(&self.predicate) {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        };
        let chosen = is_truthy(&predicate);
        Some(match (chosen, &self.then_value, &self.else_value) {
            (true, Some(value), _) => eval_property_sync(cx, value),
            (true, None, _) => Ok(Value::Bool(true)),
            (false, _, Some(value)) => eval_property_sync(cx, value),
            (false, _, None) => Ok(Value::Bool(false)),
        })
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}
