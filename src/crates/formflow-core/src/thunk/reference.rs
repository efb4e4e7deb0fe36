//! Reference handler
//!
//! Routes a path like `['answers', 'firstName']` or `['data', 'case.manager']`
//! to the matching source: a pseudo node, the request snapshot, the onLoad
//! data map, or the scope stack. A path segment that is itself an expression
//! is evaluated first, split on `.`, and spliced into the path - that is the
//! dynamic-key case, and it is what forces this handler onto the async path.
//!
//! Navigation below the base key checks every property key against a safe-key
//! allow-list. An unsafe key is a `SECURITY_VIOLATION`, which this handler
//! absorbs into an undefined value rather than failing the page.

use super::value::stringify;
use super::{AsyncProbe, ThunkHandler};
use crate::ast::{AstNode, NodeId, PropertyValue, PseudoKind};
use crate::error::{ThunkError, ThunkErrorKind, ThunkResult};
use crate::eval::EvalContext;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::warn;

/// Keys that exist to climb object graphs in the definition language's home
/// runtime; never legitimate data keys.
const DENIED_KEYS: &[&str] = &["__proto__", "prototype", "constructor"];

fn safe_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]{0,127}$").expect("valid regex"))
}

/// Check one property key against the allow-list
pub fn check_safe_key(key: &str) -> ThunkResult<()> {
    if DENIED_KEYS.contains(&key) || !safe_key_pattern().is_match(key) {
        return Err(ThunkError::security_violation(key));
    }
    Ok(())
}

/// Both compile-time and runtime-template trees resolve `@self` during
/// normalization, so meeting one here means a tree skipped that pass. Fail
/// loudly instead of silently reading a nonexistent `@self` answer key.
fn unresolved_self() -> ThunkError {
    ThunkError::lookup_failed("unresolved @self reference reached evaluation")
}

/// Navigate an evaluated value by property keys / array indices
fn navigate(mut value: Value, parts: &[String]) -> ThunkResult {
    for part in parts {
        check_safe_key(part)?;
        value = match value {
            Value::Object(mut map) => map.remove(part.as_str()).unwrap_or(Value::Null),
            Value::Array(mut items) => match part.parse::<usize>() {
                Ok(index) if index < items.len() => items.swap_remove(index),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
        if value.is_null() {
            return Ok(Value::Null);
        }
    }
    Ok(value)
}

enum Segment {
    Literal(String),
    Dynamic(NodeId),
}

/// Evaluates reference expressions
pub struct ReferenceHandler {
    id: NodeId,
    segments: Vec<Segment>,
    has_dynamic: bool,
}

impl ReferenceHandler {
    /// Build from a reference node
    pub fn new(node: &AstNode) -> crate::error::CompileResult<Self> {
        let mut segments = Vec::new();
        let mut has_dynamic = false;
        for item in node.items("path") {
            match item {
                PropertyValue::Literal(v) => segments.push(Segment::Literal(stringify(v))),
                PropertyValue::Node(id) => {
                    has_dynamic = true;
                    segments.push(Segment::Dynamic(id.clone()));
                }
                PropertyValue::List(_) => {
                    return Err(crate::error::CompileError::InvalidDefinition {
                        path: node.id.to_string(),
                        message: "reference path segments must be strings or expressions"
                            .to_string(),
                    })
                }
            }
        }
        Ok(Self {
            id: node.id.clone(),
            segments,
            has_dynamic,
        })
    }

    async fn resolve_segments(&self, cx: &EvalContext) -> ThunkResult<Vec<String>> {
        let mut out = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => {
                    // Literal dotted segments expand the same way dynamic
                    // ones do.
                    out.extend(s.split('.').map(str::to_string));
                }
                Segment::Dynamic(id) => {
                    let value = cx.invoke(id).await?;
                    out.extend(stringify(&value).split('.').map(str::to_string));
                }
            }
        }
        Ok(out)
    }

    fn resolve_segments_sync(&self, cx: &EvalContext) -> ThunkResult<Vec<String>> {
        let mut out = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.extend(s.split('.').map(str::to_string)),
                Segment::Dynamic(id) => {
                    let value = cx.invoke_sync(id)?;
                    out.extend(stringify(&value).split('.').map(str::to_string));
                }
            }
        }
        Ok(out)
    }

    async fn route(&self, cx: &EvalContext, parts: Vec<String>) -> ThunkResult {
        let Some(namespace) = parts.first() else {
            return Ok(Value::Null);
        };
        let rest = &parts[1..];

        let resolved = match namespace.as_str() {
            "post" => self.from_map(&cx.request().post, rest),
            "query" => self.from_map(&cx.request().query, rest),
            "params" => self.from_map(&cx.request().params, rest),
            "data" => match rest.first() {
                Some(base) => {
                    let value = cx.get_data(base).unwrap_or(Value::Null);
                    navigate(value, &rest[1..])
                }
                None => Ok(Value::Null),
            },
            "answers" => match rest.first() {
                Some(base) => {
                    let value = self.resolve_answer(cx, base).await?;
                    navigate(value, &rest[1..])
                }
                None => Ok(Value::Null),
            },
            "@scope" => match rest.first() {
                Some(base) => {
                    let value = cx.scope_lookup(base).unwrap_or(Value::Null);
                    navigate(value, &rest[1..])
                }
                None => Ok(Value::Null),
            },
            "@self" => Err(unresolved_self()),
            other => Err(ThunkError::lookup_failed(format!(
                "unknown reference namespace '{other}'"
            ))),
        };

        match resolved {
            // Unsafe keys degrade to undefined at the reference node.
            Err(e) if e.kind == ThunkErrorKind::SecurityViolation => {
                warn!(node = %self.id, error = %e, "unsafe reference key");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    fn from_map(
        &self,
        map: &std::collections::HashMap<String, Value>,
        rest: &[String],
    ) -> ThunkResult {
        match rest.first() {
            Some(base) => {
                let value = map.get(base).cloned().unwrap_or(Value::Null);
                navigate(value, &rest[1..])
            }
            None => Ok(Value::Null),
        }
    }

    async fn resolve_answer(&self, cx: &EvalContext, base: &str) -> ThunkResult {
        if base == "@self" {
            return Err(unresolved_self());
        }
        if let Some(pseudo) = cx.pseudo(PseudoKind::AnswerLocal, base) {
            return cx.invoke(&pseudo).await;
        }
        if let Some(pseudo) = cx.pseudo(PseudoKind::AnswerRemote, base) {
            return cx.invoke(&pseudo).await;
        }
        // Dynamic key with no compile-time pseudo node: freshest source
        // first, then the saved answer set.
        if let Some(posted) = cx.request().post.get(base) {
            return Ok(posted.clone());
        }
        Ok(cx.answers().get(base).cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ThunkHandler for ReferenceHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let parts = self.resolve_segments(cx).await?;
        self.route(cx, parts).await
    }

    fn evaluate_sync(&self, cx: &EvalContext) -> Option<ThunkResult> {
        // The async path only suspends on dynamic segments and pseudo
        // invocation; both resolve synchronously when the flags allowed a
        // sync call, so block_on-free re-implementation is safe here.
        let parts = match self.resolve_segments_sync(cx) {
            Ok(parts) => parts,
            Err(e) => return Some(Err(e)),
        };
        let Some(namespace) = parts.first() else {
            return Some(Ok(Value::Null));
        };
        let rest = &parts[1..];
        let outcome = match namespace.as_str() {
            "post" => self.from_map(&cx.request().post, rest),
            "query" => self.from_map(&cx.request().query, rest),
            "params" => self.from_map(&cx.request().params, rest),
            "data" => match rest.first() {
                Some(base) => navigate(cx.get_data(base).unwrap_or(Value::Null), &rest[1..]),
                None => Ok(Value::Null),
            },
            "@scope" => match rest.first() {
                Some(base) => navigate(
                    cx.scope_lookup(base).unwrap_or(Value::Null),
                    &rest[1..],
                ),
                None => Ok(Value::Null),
            },
            "answers" => match rest.first() {
                Some(base) if base == "@self" => Err(unresolved_self()),
                Some(base) => {
                    let value = if let Some(pseudo) = cx.pseudo(PseudoKind::AnswerLocal, base) {
                        cx.invoke_sync(&pseudo)
                    } else if let Some(pseudo) = cx.pseudo(PseudoKind::AnswerRemote, base) {
                        cx.invoke_sync(&pseudo)
                    } else if let Some(posted) = cx.request().post.get(base) {
                        Ok(posted.clone())
                    } else {
                        Ok(cx.answers().get(base).cloned().unwrap_or(Value::Null))
                    };
                    value.and_then(|v| navigate(v, &rest[1..]))
                }
                None => Ok(Value::Null),
            },
            _ => return None,
        };
        Some(match outcome {
            Err(e) if e.kind == ThunkErrorKind::SecurityViolation => Ok(Value::Null),
            other => other,
        })
    }

    fn infer_async(&self, probe: &AsyncProbe<'_>) -> bool {
        self.has_dynamic || probe.inputs_async
    }
}
