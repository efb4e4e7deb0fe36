//! Transition handlers
//!
//! The four transition kinds are small state machines:
//!
//! - **LOAD**: push `@transitionType = load`, run effects in order, halt on
//!   the first error. Idempotent by contract of the effects it runs.
//! - **ACCESS**: gate on `when`; run effects; then lazily evaluate `redirect`
//!   and `message` - a non-empty redirect wins, a configured status becomes a
//!   terminal error, otherwise the transition passes.
//! - **ACTION**: gate on `when`; run effects; report whether it executed.
//!   The controller applies first-match semantics across the list.
//! - **SUBMIT**: `ENTER -> CHECK_WHEN -> CHECK_GUARDS -> VALIDATE ->
//!   BRANCH{onValid|onInvalid} -> EMIT_NEXT`. With `validate: true` the
//!   current step's render tree is materialized first so per-iteration
//!   validations exist, then every in-scope validation runs; any triggered
//!   record routes the submission to `onInvalid`. `onAlways` effects run
//!   before the branch effects; the branch's `next` entries resolve before
//!   `onAlways`'s. An effect error aborts the branch and surfaces.
//!
//! Every transition pushes its type onto the scope stack for the duration of
//! its effect list, which is how effect functions learn their context.

use super::value::{is_truthy, stringify};
use super::ThunkHandler;
use crate::ast::{AstNode, NodeId};
use crate::error::{CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use crate::registry::{MetadataRegistry, NodeRegistry};
use crate::render::ValidationRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Scope key carrying the active transition type
pub const SCOPE_TRANSITION_TYPE: &str = "@transitionType";

/// Structured result of a transition evaluation
///
/// Serialized to JSON as the thunk value; the step controller parses it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum TransitionOutcome {
    /// Access/load transition completed with nothing to report
    Pass,
    /// Access transition demands a redirect
    Redirect {
        /// Navigation target
        location: String,
    },
    /// Access transition demands a terminal error
    Error {
        /// HTTP-semantic status
        status: u16,
        /// Evaluated message, possibly empty
        message: String,
    },
    /// Action transition reporting first-match state
    Action {
        /// True when `when` passed and the effects ran
        executed: bool,
    },
    /// Submit transition outcome
    #[serde(rename_all = "camelCase")]
    Submit {
        /// False when `when` / `guards` rejected the submission
        entered: bool,
        /// "onValid" or "onInvalid" once entered
        branch: Option<String>,
        /// Resolved navigation target, when a next entry matched
        goto: Option<String>,
        /// Terminal status from a throw-error next entry
        status: Option<u16>,
        /// Message attached to the terminal status
        message: Option<String>,
        /// Validation records that fired (onInvalid re-renders with these)
        validations: Vec<ValidationRecord>,
    },
}

impl TransitionOutcome {
    /// Encode as a thunk value
    pub fn into_value(self) -> ThunkResult {
        serde_json::to_value(&self)
            .map_err(|e| ThunkError::evaluation_failed(format!("outcome encoding: {e}")))
    }

    /// Decode from a thunk value
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

fn transition_frame(kind: &str) -> Map<String, Value> {
    let mut frame = Map::new();
    frame.insert(SCOPE_TRANSITION_TYPE.to_string(), json!(kind));
    frame
}

async fn run_effects(cx: &EvalContext, effects: &[NodeId]) -> ThunkResult<()> {
    for effect in effects {
        cx.invoke_fresh(effect).await?;
    }
    Ok(())
}

/// onLoad state machine
pub struct LoadHandler {
    id: NodeId,
    effects: Vec<NodeId>,
}

impl LoadHandler {
    /// Build from a transition.load node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            effects: node.node_items("effects"),
        })
    }
}

#[async_trait]
impl ThunkHandler for LoadHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        cx.with_frame(transition_frame("load"), run_effects(cx, &self.effects))
            .await?;
        TransitionOutcome::Pass.into_value()
    }
}

/// onAccess state machine
pub struct AccessHandler {
    id: NodeId,
    when: Option<NodeId>,
    effects: Vec<NodeId>,
    redirect: Option<crate::ast::PropertyValue>,
    status: Option<u16>,
    message: Option<crate::ast::PropertyValue>,
}

impl AccessHandler {
    /// Build from a transition.access node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            when: node.node("when").cloned(),
            effects: node.node_items("effects"),
            redirect: node.property("redirect").cloned(),
            status: node.literal("status").and_then(Value::as_u64).map(|s| s as u16),
            message: node.property("message").cloned(),
        })
    }
}

#[async_trait]
impl ThunkHandler for AccessHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        if let Some(when) = &self.when {
            if !is_truthy(&cx.invoke(when).await?) {
                return TransitionOutcome::Pass.into_value();
            }
        }

        cx.with_frame(transition_frame("access"), run_effects(cx, &self.effects))
            .await?;

        // Redirect and message stay lazy: only evaluated once the gate and
        // effects have decided the transition is live.
        if let Some(redirect) = &self.redirect {
            let location = stringify(&super::value::eval_property(cx, redirect).await?);
            if !location.is_empty() {
                return TransitionOutcome::Redirect { location }.into_value();
            }
        }
        if let Some(status) = self.status {
            let message = match &self.message {
                Some(message) => stringify(&super::value::eval_property(cx, message).await?),
                None => String::new(),
            };
            return TransitionOutcome::Error { status, message }.into_value();
        }
        TransitionOutcome::Pass.into_value()
    }
}

/// onAction state machine
pub struct ActionHandler {
    id: NodeId,
    when: Option<NodeId>,
    effects: Vec<NodeId>,
}

impl ActionHandler {
    /// Build from a transition.action node
    pub fn new(node: &AstNode) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            when: node.node("when").cloned(),
            effects: node.node_items("effects"),
        })
    }
}

#[async_trait]
impl ThunkHandler for ActionHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        if let Some(when) = &self.when {
            if !is_truthy(&cx.invoke(when).await?) {
                return TransitionOutcome::Action { executed: false }.into_value();
            }
        }
        cx.with_frame(transition_frame("action"), run_effects(cx, &self.effects))
            .await?;
        TransitionOutcome::Action { executed: true }.into_value()
    }
}

/// One submit branch's payload
#[derive(Default)]
struct BranchSpec {
    effects: Vec<NodeId>,
    next: Vec<NodeId>,
}

impl BranchSpec {
    fn from_node(node: &AstNode, branch: &str) -> Self {
        Self {
            effects: node.node_items(&format!("{branch}Effects")),
            next: node.node_items(&format!("{branch}Next")),
        }
    }
}

/// onSubmit state machine
pub struct SubmitHandler {
    id: NodeId,
    when: Option<NodeId>,
    guards: Vec<NodeId>,
    validate: bool,
    always: BranchSpec,
    valid: BranchSpec,
    invalid: BranchSpec,
}

impl SubmitHandler {
    /// Build from a transition.submit node
    pub fn new(
        node: &AstNode,
        _nodes: &NodeRegistry,
        _meta: &MetadataRegistry,
    ) -> CompileResult<Self> {
        Ok(Self {
            id: node.id.clone(),
            when: node.node("when").cloned(),
            guards: node.node_items("guards"),
            validate: node.boolean("validate").unwrap_or(false),
            always: BranchSpec::from_node(node, "onAlways"),
            valid: BranchSpec::from_node(node, "onValid"),
            invalid: BranchSpec::from_node(node, "onInvalid"),
        })
    }

    /// Evaluate every in-scope validation, materializing the step's render
    /// tree first so collection iterations contribute theirs too.
    async fn run_validations(&self, cx: &EvalContext) -> ThunkResult<Vec<ValidationRecord>> {
        let _ = cx.invoke(cx.step_id()).await;

        let mut triggered = Vec::new();
        for id in cx.step_validations() {
            let record = cx.invoke_fresh(&id).await?;
            if record.is_null() {
                continue;
            }
            if let Ok(record) = serde_json::from_value::<ValidationRecord>(record) {
                triggered.push(record);
            }
        }
        Ok(triggered)
    }

    /// Resolve the first matching next entry: branch entries first, then the
    /// shared onAlways list.
    async fn resolve_next(
        &self,
        cx: &EvalContext,
        branch: &BranchSpec,
    ) -> ThunkResult<(Option<String>, Option<u16>, Option<String>)> {
        for entry in branch.next.iter().chain(self.always.next.iter()) {
            let outcome = cx.invoke_fresh(entry).await?;
            if outcome.is_null() {
                continue;
            }
            if outcome.get("throw").and_then(Value::as_bool) == Some(true) {
                let status = outcome.get("status").and_then(Value::as_u64).unwrap_or(500) as u16;
                let message = outcome
                    .get("message")
                    .map(stringify)
                    .unwrap_or_default();
                return Ok((None, Some(status), Some(message)));
            }
            let target = stringify(&outcome);
            if !target.is_empty() {
                return Ok((Some(target), None, None));
            }
        }
        Ok((None, None, None))
    }
}

#[async_trait]
impl ThunkHandler for SubmitHandler {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult {
        let rejected = || TransitionOutcome::Submit {
            entered: false,
            branch: None,
            goto: None,
            status: None,
            message: None,
            validations: Vec::new(),
        };

        if let Some(when) = &self.when {
            if !is_truthy(&cx.invoke(when).await?) {
                return rejected().into_value();
            }
        }
        for guard in &self.guards {
            match cx.invoke(guard).await {
                Ok(value) if is_truthy(&value) => continue,
                _ => return rejected().into_value(),
            }
        }

        let validations = if self.validate {
            self.run_validations(cx).await?
        } else {
            Vec::new()
        };
        let invalid = !validations.is_empty();
        let branch = if invalid { &self.invalid } else { &self.valid };
        let branch_name = if invalid { "onInvalid" } else { "onValid" };
        debug!(transition = %self.id, branch = branch_name, triggered = validations.len(), "submission entered");

        // onAlways effects first, then the branch's own; an effect error
        // aborts the branch and surfaces.
        cx.with_frame(transition_frame("submit"), async {
            run_effects(cx, &self.always.effects).await?;
            run_effects(cx, &branch.effects).await
        })
        .await?;

        let (goto, status, message) = self.resolve_next(cx, branch).await?;
        TransitionOutcome::Submit {
            entered: true,
            branch: Some(branch_name.to_string()),
            goto,
            status,
            message,
            validations,
        }
        .into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_round_trip() {
        let outcome = TransitionOutcome::Submit {
            entered: true,
            branch: Some("onInvalid".to_string()),
            goto: None,
            status: None,
            message: None,
            validations: vec![ValidationRecord {
                field_id: "age".to_string(),
                message: "Enter an age".to_string(),
            }],
        };
        let value = outcome.clone().into_value().unwrap();
        assert_eq!(TransitionOutcome::from_value(&value), Some(outcome));
    }

    #[test]
    fn test_pass_encoding_is_stable() {
        let value = TransitionOutcome::Pass.into_value().unwrap();
        assert_eq!(value, json!({"result": "pass"}));
    }
}
