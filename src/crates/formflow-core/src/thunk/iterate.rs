//! Iterator and collection handlers
//!
//! Both evaluate their source, then walk the items sequentially, each item
//! under a fresh scope frame binding the item's own fields plus `@index` and
//! `@value`. Iterators re-evaluate a compile-time template per item; a
//! collection goes further and instantiates its raw template as a runtime AST
//! subtree per item, via the evaluation hooks, so each instance has its own
//! node identities (and its validations participate in submission checks).

use super::value::{eval_property, is_truthy};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, IterateKind, NodeId, PropertyValue};
use crate::error::{CompileError, CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Scope frame for one iteration item
fn item_frame(index: usize, item: &Value) -> Map<String, Value> {
    let mut frame = match item {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    frame.insert("@index".to_string(), Value::from(index));
    frame.insert("@value".to_string(), item.clone());
    frame
}

/// Source items, applying the shared shape rules: null reads as empty,
/// anything that is not an array is a type mismatch.
fn source_items(source: Value) -> ThunkResult<Vec<Value>> {
    match source {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items),
        other => Err(ThunkError::type_mismatch("array", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluates filter / map / find iterators
pub struct IterateHandler {
    id: NodeId,
    kind: IterateKind,
    source: PropertyValue,
    predicate: Option<NodeId>,
    transform: Option<NodeId>,
    fallback: Option<PropertyValue>,
}

impl IterateHandler {
    /// Build from an iterator node
    pub fn new(node: &AstNode, kind: IterateKind) -> CompileResult<Self> {
        let predicate = node.node("predicate").cloned();
        let transform = node.node("transform").cloned();

        if matches!(kind, IterateKind::Filter | IterateKind::Find) && predicate.is_none() {
            return Err(CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "filter/find iterators require a predicate".to_string(),
            });
        }

        Ok(Self {
            id: node.id.clone(),
            kind,
            source: node
                .property("source")
                .cloned()
                .ok_or_else(|| CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "iterator has no source".to_string(),
                })?,
            predicate,
            transform,
            fallback: node.property("fallback").cloned(),
        })
    }

    async fn fallback_or(&self, cx: &EvalContext, default: Value) -> ThunkResult {
        match &self.fallback {
            Some(fallback) => eval_property(cx, fallback).await,
            None => Ok(default),
        }
    }
}

#[async_trait]
impl ThunkHandler for IterateHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let items = source_items(eval_property(cx, &self.source).await?)
            .map_err(|e| e.at(self.id.clone()))?;

        if items.is_empty() {
            let default = match self.kind {
                IterateKind::Find => Value::Null,
                _ => Value::Array(Vec::new()),
            };
            return self.fallback_or(cx, default).await;
        }

        let mut out = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let frame = item_frame(index, &item);
            match self.kind {
                IterateKind::Filter => {
                    let predicate = self.predicate.as_ref().expect("checked at compile");
                    let verdict = cx.with_frame(frame, cx.invoke_fresh(predicate)).await?;
                    if is_truthy(&verdict) {
                        out.push(item);
                    }
                }
                IterateKind::Find => {
                    let predicate = self.predicate.as_ref().expect("checked at compile");
                    let verdict = cx.with_frame(frame, cx.invoke_fresh(predicate)).await?;
                    if is_truthy(&verdict) {
                        return Ok(item);
                    }
                }
                IterateKind::Map => match &self.transform {
                    Some(transform) => {
                        out.push(cx.with_frame(frame, cx.invoke_fresh(transform)).await?)
                    }
                    None => out.push(item),
                },
            }
        }

        match self.kind {
            IterateKind::Find => Ok(Value::Null),
            _ => Ok(Value::Array(out)),
        }
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}

/// Evaluates collections by instantiating their template per item
pub struct CollectionHandler {
    id: NodeId,
    source: PropertyValue,
    template: Value,
}

impl CollectionHandler {
    /// Build from a collection node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            source: node
                .property("source")
                .cloned()
                .ok_or_else(|| CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "collection has no source".to_string(),
                })?,
            template: node
                .literal("template")
                .cloned()
                .ok_or_else(|| CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "collection has no raw template".to_string(),
                })?,
        })
    }
}

#[async_trait]
impl ThunkHandler for CollectionHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let items = source_items(eval_property(cx, &self.source).await?)
            .map_err(|e| e.at(self.id.clone()))?;

        let mut out = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let root = cx.instantiate_template(&self.template)?;
            let frame = item_frame(index, &item);
            out.push(cx.with_frame(frame, cx.invoke(&root)).await?);
        }
        Ok(Value::Array(out))
    }

    fn infer_async(&self, _probe: &AsyncProbe<'_>) -> bool {
        // Instantiates and evaluates a subtree that is unknown until runtime.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_shape_rules() {
        assert_eq!(source_items(Value::Null).unwrap(), Vec::<Value>::new());
        assert_eq!(
            source_items(json!([1, 2])).unwrap(),
            vec![json!(1), json!(2)]
        );
        let err = source_items(json!("not an array")).unwrap_err();
        assert_eq!(err.kind, crate::error::ThunkErrorKind::TypeMismatch);
        assert!(err.message.contains("string"));
    }

    #[test]
    fn test_item_frame_binds_fields_and_markers() {
        let frame = item_frame(2, &json!({"name": "a"}));
        assert_eq!(frame["name"], json!("a"));
        assert_eq!(frame["@index"], json!(2));
        assert_eq!(frame["@value"], json!({"name": "a"}));

        // Scalar items still get the markers
        let frame = item_frame(0, &json!("x"));
        assert_eq!(frame["@value"], json!("x"));
        assert!(frame.get("name").is_none());
    }
}
