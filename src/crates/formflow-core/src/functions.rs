//! Registered domain functions and the effect context
//!
//! The engine never owns domain logic: conditions, transformers, generators,
//! and effects are registered by name and invoked with already-evaluated
//! arguments. The [`FunctionRegistry`] is shared read-only across requests;
//! what distinguishes the four kinds is the calling convention:
//!
//! - **condition** - first argument is the predicate subject; returns a value
//!   whose truthiness decides the test
//! - **transformer** - first argument is the running value (pipeline folds,
//!   field formatters)
//! - **generator** - produces a value from its arguments alone
//! - **effect** - the only kind that receives an [`EffectContext`], carrying
//!   the enclosing transition type and the write channels for server data and
//!   answer intents
//!
//! Functions register either a synchronous closure or a boxed-async one; the
//! `is_async` flag feeds the compiler's two-pass async inference.

use crate::ast::FunctionKind;
use crate::error::{ThunkError, ThunkResult};
use formflow_store::AnswerSet;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Answer mutations captured during one evaluation
///
/// Effects record intents here; the step controller commits them through the
/// answer store only after the enclosing transition finishes without error.
#[derive(Debug, Default, Clone)]
pub struct AnswerIntents {
    /// Field code -> value to write
    pub added: HashMap<String, Value>,
    /// Field codes to delete
    pub removed: Vec<String>,
}

impl AnswerIntents {
    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Context handed to effect functions
///
/// Cheap to clone; all channels are shared with the owning evaluation.
#[derive(Clone)]
pub struct EffectContext {
    /// The enclosing transition type: "load", "access", "action" or "submit"
    pub transition_type: String,
    /// Acting user from the request session, if any
    pub user: Option<String>,
    answers: AnswerSet,
    data: Arc<Mutex<Map<String, Value>>>,
    intents: Arc<Mutex<AnswerIntents>>,
}

impl EffectContext {
    /// Build a context over the evaluation's shared channels
    pub fn new(
        transition_type: impl Into<String>,
        user: Option<String>,
        answers: AnswerSet,
        data: Arc<Mutex<Map<String, Value>>>,
        intents: Arc<Mutex<AnswerIntents>>,
    ) -> Self {
        Self {
            transition_type: transition_type.into(),
            user,
            answers,
            data,
            intents,
        }
    }

    /// Saved answers prefetched for this evaluation
    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    /// Publish a server data value (readable through `data` references)
    pub fn put_data(&self, key: impl Into<String>, value: Value) {
        self.data.lock().insert(key.into(), value);
    }

    /// Record an answer write intent
    pub fn record_answer(&self, code: impl Into<String>, value: Value) {
        self.intents.lock().added.insert(code.into(), value);
    }

    /// Record an answer removal intent
    pub fn remove_answer(&self, code: impl Into<String>) {
        self.intents.lock().removed.push(code.into());
    }
}

impl std::fmt::Debug for EffectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectContext")
            .field("transition_type", &self.transition_type)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// One invocation of a registered function
pub struct FunctionCall {
    /// Evaluated arguments, in declaration order
    pub args: Vec<Value>,
    /// Present only when an effect is being invoked
    pub effect: Option<EffectContext>,
}

type SyncEval = Arc<dyn Fn(FunctionCall) -> ThunkResult + Send + Sync>;
type AsyncEval = Arc<dyn Fn(FunctionCall) -> BoxFuture<'static, ThunkResult> + Send + Sync>;

enum FunctionEval {
    Sync(SyncEval),
    Async(AsyncEval),
}

/// A function registered with the engine
pub struct RegisteredFunction {
    /// Registry key
    pub name: String,
    /// Calling convention
    pub kind: FunctionKind,
    /// Feeds async inference; sync closures default to false
    pub is_async: bool,
    eval: FunctionEval,
}

/// Name-keyed registry of domain functions
#[derive(Default)]
pub struct FunctionRegistry {
    entries: HashMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prepared entry
    pub fn register(&mut self, function: RegisteredFunction) {
        self.entries.insert(function.name.clone(), function);
    }

    /// Register a synchronous function of any kind
    pub fn register_sync(
        &mut self,
        name: impl Into<String>,
        kind: FunctionKind,
        f: impl Fn(FunctionCall) -> ThunkResult + Send + Sync + 'static,
    ) {
        let name = name.into();
        self.register(RegisteredFunction {
            name,
            kind,
            is_async: false,
            eval: FunctionEval::Sync(Arc::new(f)),
        });
    }

    /// Register an asynchronous function of any kind
    pub fn register_async(
        &mut self,
        name: impl Into<String>,
        kind: FunctionKind,
        f: impl Fn(FunctionCall) -> BoxFuture<'static, ThunkResult> + Send + Sync + 'static,
    ) {
        let name = name.into();
        self.register(RegisteredFunction {
            name,
            kind,
            is_async: true,
            eval: FunctionEval::Async(Arc::new(f)),
        });
    }

    /// Register a condition from a plain boolean closure
    pub fn register_condition(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) {
        self.register_sync(name, FunctionKind::Condition, move |call| {
            Ok(Value::Bool(f(&call.args)))
        });
    }

    /// Register a transformer from a value closure
    pub fn register_transformer(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> ThunkResult + Send + Sync + 'static,
    ) {
        self.register_sync(name, FunctionKind::Transformer, move |call| f(&call.args));
    }

    /// Register a generator from a value closure
    pub fn register_generator(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> ThunkResult + Send + Sync + 'static,
    ) {
        self.register_sync(name, FunctionKind::Generator, move |call| f(&call.args));
    }

    /// Register an effect; effects are always treated as async
    pub fn register_effect(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(EffectContext, Vec<Value>) -> BoxFuture<'static, ThunkResult>
            + Send
            + Sync
            + 'static,
    ) {
        self.register_async(name, FunctionKind::Effect, move |call| {
            let context = call
                .effect
                .expect("effects are invoked with an effect context");
            f(context, call.args)
        });
    }

    /// Entry lookup
    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.entries.get(name)
    }

    /// Async flag for inference; unknown names default to async-safe
    pub fn is_async(&self, name: &str) -> bool {
        self.entries.get(name).map(|f| f.is_async).unwrap_or(true)
    }

    /// Invoke by name
    ///
    /// A missing function is `LOOKUP_FAILED`; a failing evaluator is wrapped
    /// as `EVALUATION_FAILED` with the cause preserved.
    pub async fn call(&self, name: &str, call: FunctionCall) -> ThunkResult {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ThunkError::lookup_failed(format!("function '{name}' is not registered")))?;

        let outcome = match &entry.eval {
            FunctionEval::Sync(f) => f(call),
            FunctionEval::Async(f) => f(call).await,
        };
        outcome.map_err(|e| {
            ThunkError::evaluation_failed(format!("function '{name}' failed: {}", e.message))
        })
    }

    /// Synchronous invocation; `None` when the function only has an async
    /// evaluator
    pub fn call_sync(&self, name: &str, call: FunctionCall) -> Option<ThunkResult> {
        match self.entries.get(name) {
            Some(RegisteredFunction {
                eval: FunctionEval::Sync(f),
                ..
            }) => Some(f(call)),
            Some(_) => None,
            None => Some(Err(ThunkError::lookup_failed(format!(
                "function '{name}' is not registered"
            )))),
        }
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(args: Vec<Value>) -> FunctionCall {
        FunctionCall {
            args,
            effect: None,
        }
    }

    #[tokio::test]
    async fn test_missing_function_is_lookup_failed() {
        let registry = FunctionRegistry::new();
        let err = registry.call("nope", call(vec![])).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ThunkErrorKind::LookupFailed);
    }

    #[tokio::test]
    async fn test_condition_convention() {
        let mut registry = FunctionRegistry::new();
        registry.register_condition("isAdult", |args| {
            args.first()
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<i64>().ok())
                .map(|age| age >= 18)
                .unwrap_or(false)
        });

        let result = registry.call("isAdult", call(vec![json!("21")])).await.unwrap();
        assert_eq!(result, json!(true));
        let result = registry.call("isAdult", call(vec![json!("17")])).await.unwrap();
        assert_eq!(result, json!(false));
    }

    #[tokio::test]
    async fn test_failing_function_is_wrapped() {
        let mut registry = FunctionRegistry::new();
        registry.register_transformer("explode", |_| {
            Err(ThunkError::evaluation_failed("boom"))
        });
        let err = registry.call("explode", call(vec![])).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ThunkErrorKind::EvaluationFailed);
        assert!(err.message.contains("explode"));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_call_sync_refuses_async_entries() {
        let mut registry = FunctionRegistry::new();
        registry.register_async("slow", FunctionKind::Generator, |_| {
            Box::pin(async { Ok(json!(1)) })
        });
        assert!(registry.call_sync("slow", call(vec![])).is_none());
        assert!(registry.is_async("slow"));
    }

    #[test]
    fn test_effect_context_channels() {
        let data = Arc::new(Mutex::new(Map::new()));
        let intents = Arc::new(Mutex::new(AnswerIntents::default()));
        let context = EffectContext::new(
            "submit",
            Some("tester".to_string()),
            AnswerSet::new(),
            Arc::clone(&data),
            Arc::clone(&intents),
        );

        context.put_data("people", json!([{"name": "a"}]));
        context.record_answer("firstName", json!("Ada"));
        context.remove_answer("stale");

        assert_eq!(data.lock()["people"], json!([{"name": "a"}]));
        let captured = intents.lock();
        assert_eq!(captured.added["firstName"], json!("Ada"));
        assert_eq!(captured.removed, vec!["stale".to_string()]);
    }
}
