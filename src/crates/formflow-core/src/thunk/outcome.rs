//! Outcome handlers: next, throw-error, validation
//!
//! All three follow the same gate-then-payload shape: an optional (for
//! validation, mandatory) `when` predicate decides whether the node produces
//! anything, and the payload - navigation target, error record, validation
//! record - is only evaluated once the gate is open, keeping messages lazy.

use super::value::{eval_property, is_truthy, stringify};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, NodeKind, PropertyValue, StructureKind};
use crate::error::{CompileError, CompileResult, ThunkResult};
use crate::eval::EvalContext;
use crate::registry::{MetadataRegistry, NodeRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Evaluates `next` navigation outcomes
pub struct NextHandler {
    id: NodeId,
    when: Option<NodeId>,
    goto: PropertyValue,
}

impl NextHandler {
    /// Build from a next node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            when: node.node("when").cloned(),
            goto: node
                .property("goto")
                .cloned()
                .ok_or_else(|| CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "next has no goto".to_string(),
                })?,
        })
    }
}

#[async_trait]
impl ThunkHandler for NextHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        if let Some(when) = &self.when {
            if !is_truthy(&cx.invoke(when).await?) {
                return Ok(Value::Null);
            }
        }
        eval_property(cx, &self.goto).await
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}

/// Evaluates `throw-error` terminal outcomes
pub struct ThrowErrorHandler {
    id: NodeId,
    when: Option<NodeId>,
    status: u16,
    message: Option<PropertyValue>,
}

impl ThrowErrorHandler {
    /// Build from a throw-error node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        let status = node
            .literal("status")
            .and_then(Value::as_u64)
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "throw-error has no status".to_string(),
            })? as u16;
        Ok(Self {
            id: node.id.clone(),
            when: node.node("when").cloned(),
            status,
            message: node.property("message").cloned(),
        })
    }
}

#[async_trait]
impl ThunkHandler for ThrowErrorHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        if let Some(when) = &self.when {
            if !is_truthy(&cx.invoke(when).await?) {
                return Ok(Value::Null);
            }
        }
        // An undefined message coerces to the empty string.
        let message = match &self.message {
            Some(message) => stringify(&eval_property(cx, message).await?),
            None => String::new(),
        };
        Ok(json!({"throw": true, "status": self.status, "message": message}))
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}

/// Evaluates validation records
pub struct ValidationHandler {
    id: NodeId,
    when: NodeId,
    message: Option<PropertyValue>,
    field_id: String,
}

impl ValidationHandler {
    /// Build from a validation node, resolving the owning field at compile
    /// time by climbing to the nearest enclosing field block.
    pub fn new(
        node: &AstNode,
        nodes: &NodeRegistry,
        meta: &MetadataRegistry,
    ) -> CompileResult<Self> {
        let when = node
            .node("when")
            .cloned()
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "validation has no when predicate".to_string(),
            })?;

        let field_id = meta
            .ancestors(&node.id)
            .into_iter()
            .find_map(|ancestor| {
                let field = nodes.get(&ancestor)?;
                if field.kind == NodeKind::Structure(StructureKind::Field) {
                    field.string("code").map(str::to_string)
                } else {
                    None
                }
            })
            .unwrap_or_else(|| node.id.to_string());

        Ok(Self {
            id: node.id.clone(),
            when,
            message: node.property("message").cloned(),
            field_id,
        })
    }
}

#[async_trait]
impl ThunkHandler for ValidationHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        if !is_truthy(&cx.invoke(&self.when).await?) {
            return Ok(Value::Null);
        }
        // The message may be a format expression; it only evaluates once the
        // validation actually fires.
        let message = match &self.message {
            Some(message) => stringify(&eval_property(cx, message).await?),
            None => String::new(),
        };
        Ok(json!({"fieldId": self.field_id, "message": message}))
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}
