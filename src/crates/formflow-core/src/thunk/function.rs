//! Function and effect handlers
//!
//! Both evaluate their arguments in parallel and pass failed arguments as
//! undefined. The difference is the calling convention: an effect executes at
//! the moment its node is reached, under the transition type its enclosing
//! transition pushed onto the scope stack, and receives an
//! [`EffectContext`](crate::functions::EffectContext) with the evaluation's
//! write channels.

use super::value::{eval_property, eval_property_sync};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, FunctionKind, NodeId, PropertyValue};
use crate::error::{CompileError, CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use crate::functions::FunctionCall;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

fn extract_name(node: &AstNode) -> CompileResult<String> {
    node.string("name")
        .map(str::to_string)
        .ok_or_else(|| CompileError::InvalidDefinition {
            path: node.id.to_string(),
            message: "function node has no name".to_string(),
        })
}

fn extract_arguments(node: &AstNode) -> Vec<PropertyValue> {
    match node.property("arguments") {
        Some(PropertyValue::List(items)) => items.clone(),
        Some(single) => vec![single.clone()],
        None => Vec::new(),
    }
}

async fn evaluate_arguments(cx: &EvalContext, arguments: &[PropertyValue]) -> Vec<Value> {
    join_all(arguments.iter().map(|arg| eval_property(cx, arg)))
        .await
        .into_iter()
        .map(|outcome| outcome.unwrap_or(Value::Null))
        .collect()
}

/// Evaluates condition / transformer / generator invocations
pub struct FunctionHandler {
    id: NodeId,
    name: String,
    #[allow(dead_code)]
    kind: FunctionKind,
    arguments: Vec<PropertyValue>,
}

impl FunctionHandler {
    /// Build from a function node
    pub fn new(node: &AstNode, kind: FunctionKind) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            name: extract_name(node)?,
            kind,
            arguments: extract_arguments(node),
        })
    }
}

#[async_trait]
impl ThunkHandler for FunctionHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let args = evaluate_arguments(cx, &self.arguments).await;
        cx.functions()
            .call(&self.name, FunctionCall { args, effect: None })
            .await
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        let args = self
            .arguments
            .iter()
            .map(|arg| eval_property_sync(cx, arg).unwrap_or(Value::Null))
            .collect();
        cx.functions()
            .call_sync(&self.name, FunctionCall { args, effect: None })
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async || probe.functions.is_async(&self.name)
    }
}

/// Executes effect invocations
pub struct EffectHandler {
    id: NodeId,
    name: String,
    arguments: Vec<PropertyValue>,
}

impl EffectHandler {
    /// Build from a function.effect node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            name: extract_name(node)?,
            arguments: extract_arguments(node),
        })
    }
}

#[async_trait]
impl ThunkHandler for EffectHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        // Captured-args model: arguments evaluate at the moment the effect is
        // reached, then the function runs under the enclosing transition type.
        let transition_type = cx.transition_type().ok_or_else(|| {
            ThunkError::evaluation_failed(format!(
                "effect '{}' invoked outside a transition",
                self.name
            ))
        })?;
        let args = evaluate_arguments(cx, &self.arguments).await;
        let effect = cx.effect_context(transition_type);
        cx.functions()
            .call(
                &self.name,
                FunctionCall {
                    args,
                    effect: Some(effect),
                },
            )
            .await
    }

    fn infer_async(&self, _probe: &AsyncProbe<'_>) -> bool {
        // Effects suspend by definition.
        true
    }
}
