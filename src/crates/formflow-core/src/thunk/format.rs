//! Format handler
//!
//! `%N` placeholders are 1-indexed. Arguments evaluate in parallel, render
//! through [`stringify`](super::value::stringify) and are HTML-escaped; the
//! template itself is trusted author content and passes through verbatim. An
//! out-of-range placeholder, a null argument, or a failed argument all render
//! as the empty string.

use super::value::{escape_html, eval_property, eval_property_sync, stringify};
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, PropertyValue};
use crate::error::{CompileResult, ThunkResult};
use crate::eval::EvalContext;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"%(\d+)").expect("valid regex"))
}

/// Evaluates format expressions
pub struct FormatHandler {
    id: NodeId,
    template: String,
    arguments: Vec<PropertyValue>,
}

impl FormatHandler {
    /// Build from a format node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        let template = node
            .string("template")
            .ok_or_else(|| crate::error::CompileError::InvalidDefinition {
                path: node.id.to_string(),
                message: "format requires a string template".to_string(),
            })?
            .to_string();
        let arguments = match node.property("arguments") {
            Some(PropertyValue::List(items)) => items.clone(),
            Some(single) => vec![single.clone()],
            None => Vec::new(),
        };
        Ok(Self {
            id: node.id.clone(),
            template,
            arguments,
        })
    }

    fn substitute(&self, rendered: &[String]) -> Value {
        let out = placeholder_pattern().replace_all(&self.template, |caps: &regex::Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .and_then(|n| rendered.get(n - 1))
                .cloned()
                .unwrap_or_default()
        });
        Value::String(out.into_owned())
    }

    fn render_argument(&self, outcome: ThunkResult) -> String {
        match outcome {
            Ok(value) => escape_html(&stringify(&value)),
            Err(e) => {
                // Failed arguments degrade to the empty string.
                warn!(node = %self.id, error = %e, "format argument failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl ThunkHandler for FormatHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let outcomes = join_all(self.arguments.iter().map(|arg| eval_property(cx, arg))).await;
        let rendered: Vec<String> = outcomes
            .into_iter()
            .map(|outcome| self.render_argument(outcome))
            .collect();
        Ok(self.substitute(&rendered))
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        let rendered: Vec<String> = self
            .arguments
            .iter()
            .map(|arg| self.render_argument(eval_property_sync(cx, arg)))
            .collect();
        Some(Ok(self.substitute(&rendered)))
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        probe.inputs_async
    }
}
