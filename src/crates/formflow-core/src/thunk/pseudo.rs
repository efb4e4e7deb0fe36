//! Pseudo-node handlers
//!
//! Pseudo nodes make request-side inputs and answer sources first-class graph
//! participants. Their handlers are thin:
//!
//! - POST / QUERY / PARAMS read straight out of the request snapshot and are
//!   the engine's canonical synchronous thunks.
//! - DATA reads the map onLoad effects publish into.
//! - ANSWER_REMOTE reads the prefetched answer set.
//! - ANSWER_LOCAL resolves the freshest value for a field on the current
//!   step: the posted value (run through the field's formatters) wins, then
//!   the saved answer, then the field's default value.

use super::value::eval_property;
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, NodeKind, PropertyValue, PseudoKind, StructureKind};
use crate::error::{CompileError, CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use crate::functions::FunctionCall;
use crate::registry::{MetadataRegistry, NodeRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;

/// One formatter application, pre-extracted from its function node
struct FormatterSpec {
    name: String,
    arguments: Vec<PropertyValue>,
}

/// Field-derived inputs of an ANSWER_LOCAL pseudo node
#[derive(Default)]
struct LocalSpec {
    formatters: Vec<FormatterSpec>,
    default_value: Option<PropertyValue>,
}

/// Evaluates all six pseudo subkinds
pub struct PseudoHandler {
    id: NodeId,
    kind: PseudoKind,
    key: String,
    local: LocalSpec,
}

impl PseudoHandler {
    /// Build from a pseudo node; ANSWER_LOCAL additionally resolves its
    /// owning field block to capture formatters and default value.
    pub fn new(
        node: &AstNode,
        kind: PseudoKind,
        nodes: &NodeRegistry,
        meta: &MetadataRegistry,
    ) -> CompileResult<Self> {
        let key = node
            .string("key")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "pseudo node has no key".to_string(),
            })?
            .to_string();

        let local = if kind == PseudoKind::AnswerLocal {
            find_local_spec(nodes, meta, &key)?
        } else {
            LocalSpec::default()
        };

        Ok(Self {
            id: node.id.clone(),
            kind,
            key,
            local,
        })
    }

    async fn resolve_local(&self, cx: &EvalContext) -> ThunkResult {
        if let Some(posted) = cx.request().post.get(&self.key).cloned() {
            let mut value = posted;
            // Formatters run inline over the posted value, in order.
            for formatter in &self.local.formatters {
                let mut args = vec![value];
                let extra =
                    join_all(formatter.arguments.iter().map(|arg| eval_property(cx, arg))).await;
                args.extend(extra.into_iter().map(|o| o.unwrap_or(Value::Null)));
                value = cx
                    .functions()
                    .call(&formatter.name, FunctionCall { args, effect: None })
                    .await
                    .map_err(|e| {
                        ThunkError::evaluation_failed(format!(
                            "formatter '{}' on field '{}' failed: {}",
                            formatter.name, self.key, e.message
                        ))
                    })?;
            }
            return Ok(value);
        }

        if let Some(saved) = cx.answers().get(&self.key) {
            return Ok(saved.clone());
        }
        match &self.local.default_value {
            Some(default) => eval_property(cx, default).await,
            None => Ok(Value::Null),
        }
    }

    /// Synchronous twin of [`resolve_local`](Self::resolve_local); `None`
    /// when a formatter only has an async evaluator.
    fn resolve_local_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        if let Some(posted) = cx.request().post.get(&self.key).cloned() {
            let mut value = posted;
            for formatter in &self.local.formatters {
                let mut args = vec![value];
                for arg in &formatter.arguments {
                    args.push(super::value::eval_property_sync(cx, arg).unwrap_or(Value::Null));
                }
                let outcome = cx
                    .functions()
                    .call_sync(&formatter.name, FunctionCall { args, effect: None })?;
                value = match outcome {
                    Ok(v) => v,
                    Err(e) => {
                        return Some(Err(ThunkError::evaluation_failed(format!(
                            "formatter '{}' on field '{}' failed: {}",
                            formatter.name, self.key, e.message
                        ))))
                    }
                };
            }
            return Some(Ok(value));
        }
        if let Some(saved) = cx.answers().get(&self.key) {
            return Some(Ok(saved.clone()));
        }
        match &self.local.default_value {
            Some(default) => Some(super::value::eval_property_sync(cx, default)),
            None => Some(Ok(Value::Null)),
        }
    }
}

fn find_local_spec(
    nodes: &NodeRegistry,
    meta: &MetadataRegistry,
    key: &str,
) -> CompileResult<LocalSpec> {
    let field = nodes
        .of_kind(NodeKind::Structure(StructureKind::Field))
        .iter()
        .find(|id| {
            meta.is_descendant_of_step(id)
                && nodes
                    .get(id)
                    .and_then(|n| n.string("code"))
                    .map(|code| code == key)
                    .unwrap_or(false)
        })
        .and_then(|id| nodes.get(id));

    let Some(field) = field else {
        return Ok(LocalSpec::default());
    };

    let mut formatters = Vec::new();
    for id in field.node_items("formatters") {
        let function = nodes.get(&id).ok_or_else(|| CompileError::InvalidDefinition {
            path: id.to_string(),
            message: "formatter references an unregistered node".to_string(),
        })?;
        let name = function
            .string("name")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: id.to_string(),
                message: "formatter function has no name".to_string(),
            })?
            .to_string();
        let arguments = match function.property("arguments") {
            Some(PropertyValue::List(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        formatters.push(FormatterSpec { name, arguments });
    }

    Ok(LocalSpec {
        formatters,
        default_value: field.property("defaultValue").cloned(),
    })
}

#[async_trait]
impl ThunkHandler for PseudoHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        match self.kind {
            PseudoKind::Post => Ok(cx
                .request()
                .post
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null)),
            PseudoKind::Query => Ok(cx
                .request()
                .query
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null)),
            PseudoKind::Params => Ok(cx
                .request()
                .params
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null)),
            PseudoKind::Data => Ok(cx.get_data(&self.key).unwrap_or(Value::Null)),
            PseudoKind::AnswerRemote => {
                Ok(cx.answers().get(&self.key).cloned().unwrap_or(Value::Null))
            }
            PseudoKind::AnswerLocal => self.resolve_local(cx).await,
        }
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        match self.kind {
            PseudoKind::Post => Some(Ok(cx
                .request()
                .post
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null))),
            PseudoKind::Query => Some(Ok(cx
                .request()
                .query
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null))),
            PseudoKind::Params => Some(Ok(cx
                .request()
                .params
                .get(&self.key)
                .cloned()
                .unwrap_or(Value::Null))),
            PseudoKind::Data => Some(Ok(cx.get_data(&self.key).unwrap_or(Value::Null))),
            PseudoKind::AnswerRemote => {
                Some(Ok(cx.answers().get(&self.key).cloned().unwrap_or(Value::Null)))
            }
            PseudoKind::AnswerLocal => self.resolve_local_sync(cx),
        }
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        match self.kind {
            PseudoKind::Post | PseudoKind::Query | PseudoKind::Params => false,
            PseudoKind::Data | PseudoKind::AnswerRemote => probe.inputs_async,
            PseudoKind::AnswerLocal => {
                probe.inputs_async
                    || self
                        .local
                        .formatters
                        .iter()
                        .any(|f| probe.functions.is_async(&f.name))
            }
        }
    }
}
