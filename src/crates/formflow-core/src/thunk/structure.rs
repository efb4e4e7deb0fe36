//! Structure handlers
//!
//! A structure node evaluates into its piece of the render tree:
//!
//! - a block (or field) becomes `{"id", "variant", ...evaluated props,
//!   "blocks": [children]}` - expression props that fail evaluate to null
//!   rather than failing the page;
//! - a field additionally resolves its `code` and its current `value`
//!   through the local answer source;
//! - a step becomes `{"id", "path", "title", "blocks": [...]}`;
//! - a journey contributes its own metadata only - steps render one at a
//!   time, never as part of the journey node.

use super::value::{eval_property, stringify};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, NodeKind, PropertyValue, PseudoKind, StructureKind};
use crate::error::{CompileError, CompileResult, ThunkResult};
use crate::eval::EvalContext;
use crate::registry::NodeRegistry;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

/// Properties with dedicated handling; everything else on a block is an
/// ordinary component prop.
const RESERVED: &[&str] = &[
    "steps",
    "children",
    "onLoad",
    "onAccess",
    "onAction",
    "onSubmission",
    "validate",
    "blocks",
    "formatters",
    "defaultValue",
    "code",
    "variant",
    "path",
    "title",
];

/// Evaluates journey / step / block nodes into render-tree fragments
pub struct StructureHandler {
    id: NodeId,
    kind: StructureKind,
    variant: Option<String>,
    path: Option<String>,
    journey_code: Option<String>,
    title: Option<PropertyValue>,
    code: Option<PropertyValue>,
    props: Vec<(String, PropertyValue)>,
    blocks: Vec<NodeId>,
}

impl StructureHandler {
    /// Build from a structure node
    pub fn new(node: &AstNode, _nodes: &NodeRegistry) -> CompileResult<Self> {
        let kind = match node.kind {
            NodeKind::Structure(kind) => kind,
            _ => {
                return Err(CompileError::InvalidDefinition {
                    path: node.id.to_string(),
                    message: "structure handler over a non-structure node".to_string(),
                })
            }
        };

        let props = node
            .properties
            .iter()
            .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id: node.id.clone(),
            kind,
            variant: node.string("variant").map(str::to_string),
            path: node.string("path").map(str::to_string),
            journey_code: node.string("code").map(str::to_string),
            title: node.property("title").cloned(),
            code: match kind {
                StructureKind::Field => node.property("code").cloned(),
                _ => None,
            },
            props,
            blocks: node.node_items("blocks"),
        })
    }

    async fn soft_eval(&self, cx: &EvalContext, key: &str, value: &PropertyValue) -> Value {
        match eval_property(cx, value).await {
            Ok(v) => v,
            Err(e) => {
                // Render blocks degrade per-prop instead of failing the page.
                warn!(node = %self.id, prop = key, error = %e, "block prop failed");
                Value::Null
            }
        }
    }

    async fn field_value(&self, cx: &EvalContext, code: &str) -> Value {
        if let Some(pseudo) = cx.pseudo(PseudoKind::AnswerLocal, code) {
            return match cx.invoke(&pseudo).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(node = %self.id, field = code, error = %e, "field value failed");
                    Value::Null
                }
            };
        }
        if let Some(posted) = cx.request().post.get(code) {
            return posted.clone();
        }
        cx.answers().get(code).cloned().unwrap_or(Value::Null)
    }

    async fn evaluate_block(&self, cx: &EvalContext) -> ThunkResult {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.id.to_string()));
        if let Some(variant) = &self.variant {
            out.insert("variant".to_string(), Value::String(variant.clone()));
        }
        if let Some(title) = &self.title {
            let value = self.soft_eval(cx, "title", title).await;
            out.insert("title".to_string(), value);
        }
        for (key, prop) in &self.props {
            let value = self.soft_eval(cx, key, prop).await;
            out.insert(key.clone(), value);
        }

        if self.kind == StructureKind::Field {
            if let Some(code) = &self.code {
                let code = stringify(&self.soft_eval(cx, "code", code).await);
                if !code.is_empty() {
                    out.insert("value".to_string(), self.field_value(cx, &code).await);
                    out.insert("code".to_string(), Value::String(code));
                }
            }
        }

        if !self.blocks.is_empty() {
            let mut children = Vec::with_capacity(self.blocks.len());
            for block in &self.blocks {
                children.push(cx.invoke(block).await?);
            }
            out.insert("blocks".to_string(), Value::Array(children));
        }
        Ok(Value::Object(out))
    }

    async fn evaluate_step(&self, cx: &EvalContext) -> ThunkResult {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.id.to_string()));
        if let Some(path) = &self.path {
            out.insert("path".to_string(), Value::String(path.clone()));
        }
        if let Some(title) = &self.title {
            let value = self.soft_eval(cx, "title", title).await;
            out.insert("title".to_string(), value);
        }
        let mut children = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            children.push(cx.invoke(block).await?);
        }
        out.insert("blocks".to_string(), Value::Array(children));
        Ok(Value::Object(out))
    }

    async fn evaluate_journey(&self, cx: &EvalContext) -> ThunkResult {
        let mut out = Map::new();
        out.insert("id".to_string(), Value::String(self.id.to_string()));
        if let Some(code) = &self.journey_code {
            out.insert("code".to_string(), Value::String(code.clone()));
        }
        if let Some(path) = &self.path {
            out.insert("path".to_string(), Value::String(path.clone()));
        }
        if let Some(title) = &self.title {
            let value = self.soft_eval(cx, "title", title).await;
            out.insert("title".to_string(), value);
        }
        Ok(Value::Object(out))
    }
}

#[async_trait]
impl ThunkHandler for StructureHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        match self.kind {
            StructureKind::Journey => self.evaluate_journey(cx).await,
            StructureKind::Step => self.evaluate_step(cx).await,
            StructureKind::Block | StructureKind::Field => self.evaluate_block(cx).await,
        }
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        match self.kind {
            // Field values route through answer sources that may suspend.
            StructureKind::Field => true,
            _ => probe.inputs_async,
        }
    }
}
