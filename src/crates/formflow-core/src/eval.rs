//! Evaluation context and invoker
//!
//! One [`EvalContext`] exists per request. It owns everything mutable about an
//! evaluation - the scope stack, the per-evaluation memo cache, captured
//! answer intents, the onLoad `data` map, and the runtime-node overlay - while
//! sharing the compiled artifacts (registries, graph, handlers) read-only with
//! every other request.
//!
//! # Invocation
//!
//! - [`EvalContext::invoke`] memoizes by node id; a memoized outcome includes
//!   its error state, so a failing thunk fails identically on re-read.
//! - [`EvalContext::invoke_fresh`] bypasses the cache. Iterate templates and
//!   transition effects go through it: the former because the same node
//!   evaluates under successive scope frames, the latter because effect
//!   execution is an action, not a value.
//! - [`EvalContext::invoke_sync`] is defined only when the target's inferred
//!   async flag is false; since flags are computed in topological order, a
//!   sync flag already guarantees the whole transitive input cone is sync.
//!
//! # Runtime subtrees
//!
//! Collection handlers call [`EvalContext::instantiate_template`] per item.
//! The template JSON is transformed in the `runtime_ast` id space, normalized
//! (`@self` references resolve against the template's own fields, exactly as
//! at compile time), registered into the evaluation's private overlay
//! (parents stamped), wired with the runtime wirer set, cycle-checked with a
//! scoped sort, and compiled into handlers - then evaluated like any other
//! node and discarded with the context.
//!
//! Locks are `parking_lot` mutexes and are never held across an await point.

use crate::ast::{AstNode, ExpressionKind, IdGenerator, NodeId, NodeKind};
use crate::error::{ThunkError, ThunkResult};
use crate::functions::{AnswerIntents, EffectContext, FunctionRegistry};
use crate::normalize::{Normalizer, ResolveSelfReferences};
use crate::graph::DepGraph;
use crate::registry::{MetadataRegistry, NodeRegistry};
use crate::request::StepRequest;
use crate::thunk::{compile_handlers, HandlerRegistry, ThunkHandler};
use crate::transform::transform_runtime_template;
use crate::wiring::{runtime_wirers, WiringContext};
use formflow_store::AnswerSet;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Compiled artifacts shared read-only by every evaluation of one form
#[derive(Clone)]
pub struct CompiledArtifacts {
    /// Frozen node store
    pub nodes: Arc<NodeRegistry>,
    /// Stamped metadata
    pub meta: Arc<MetadataRegistry>,
    /// Wired dependency graph
    pub graph: Arc<DepGraph>,
    /// Compiled handlers with async flags
    pub handlers: Arc<HandlerRegistry>,
    /// Registered domain functions
    pub functions: Arc<FunctionRegistry>,
    /// The current step
    pub step_id: NodeId,
}

/// Per-evaluation runtime-node overlay
#[derive(Default)]
struct RuntimeOverlay {
    nodes: NodeRegistry,
    meta: MetadataRegistry,
    graph: DepGraph,
    handlers: HandlerRegistry,
    ids: IdGenerator,
}

/// Per-request evaluation state plus the invoker surface
pub struct EvalContext {
    artifacts: CompiledArtifacts,
    request: StepRequest,
    answers: AnswerSet,
    evaluation_id: Uuid,
    scope: Mutex<Vec<Map<String, Value>>>,
    cache: Mutex<HashMap<NodeId, ThunkResult>>,
    in_flight: Mutex<HashSet<NodeId>>,
    data: Arc<Mutex<Map<String, Value>>>,
    intents: Arc<Mutex<AnswerIntents>>,
    runtime: Mutex<RuntimeOverlay>,
}

impl EvalContext {
    /// Build the context for one request
    pub fn new(artifacts: CompiledArtifacts, request: StepRequest, answers: AnswerSet) -> Self {
        let evaluation_id = Uuid::new_v4();
        debug!(%evaluation_id, url = %request.url, "starting evaluation");
        Self {
            artifacts,
            request,
            answers,
            evaluation_id,
            scope: Mutex::new(Vec::new()),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            data: Arc::new(Mutex::new(Map::new())),
            intents: Arc::new(Mutex::new(AnswerIntents::default())),
            runtime: Mutex::new(RuntimeOverlay::default()),
        }
    }

    /// Unique id of this evaluation (tracing / store commands)
    pub fn evaluation_id(&self) -> Uuid {
        self.evaluation_id
    }

    /// The request snapshot
    pub fn request(&self) -> &StepRequest {
        &self.request
    }

    /// Registered domain functions
    pub fn functions(&self) -> &FunctionRegistry {
        &self.artifacts.functions
    }

    /// Prefetched saved answers
    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    /// The current step node
    pub fn step_id(&self) -> &NodeId {
        &self.artifacts.step_id
    }

    /// Compile-time metadata
    pub fn meta(&self) -> &MetadataRegistry {
        &self.artifacts.meta
    }

    /// Server data value published by an onLoad effect
    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    /// Node lookup across the compile-time registry and the runtime overlay
    pub fn node(&self, id: &NodeId) -> Option<AstNode> {
        if let Some(node) = self.artifacts.nodes.get(id) {
            return Some(node.clone());
        }
        self.runtime.lock().nodes.get(id).cloned()
    }

    /// Pseudo-node lookup (compile-time only; overlays never synthesize)
    pub fn pseudo(&self, kind: crate::ast::PseudoKind, key: &str) -> Option<NodeId> {
        self.artifacts.nodes.pseudo(kind, key).cloned()
    }

    fn handler_for(&self, id: &NodeId) -> ThunkResult<Arc<dyn ThunkHandler>> {
        if let Some(handler) = self.artifacts.handlers.get(id) {
            return Ok(Arc::clone(handler));
        }
        self.runtime.lock().handlers.require(id)
    }

    fn flagged_async(&self, id: &NodeId) -> bool {
        if self.artifacts.handlers.get(id).is_some() {
            return self.artifacts.handlers.is_async(id);
        }
        // Runtime handlers skip inference and stay on the async-safe default.
        true
    }

    /// Memoized invocation
    ///
    /// While scope frames are active the cache is bypassed entirely: the same
    /// node legitimately evaluates to different values under different
    /// frames, and a value memoized inside one frame must not leak outside
    /// it.
    pub async fn invoke(&self, id: &NodeId) -> ThunkResult {
        if !self.scope.lock().is_empty() {
            return self.invoke_fresh(id).await;
        }
        if let Some(cached) = self.cache.lock().get(id) {
            trace!(node = %id, "memo hit");
            return cached.clone();
        }
        let outcome = self.invoke_fresh(id).await;
        self.cache.lock().insert(id.clone(), outcome.clone());
        outcome
    }

    /// Uncached invocation
    pub async fn invoke_fresh(&self, id: &NodeId) -> ThunkResult {
        let handler = self.handler_for(id)?;
        if !self.in_flight.lock().insert(id.clone()) {
            return Err(ThunkError::evaluation_failed(format!(
                "re-entrant evaluation of node {id}"
            ))
            .at(id.clone()));
        }
        let outcome = handler.evaluate(self).await;
        self.in_flight.lock().remove(id);
        outcome.map_err(|e| if e.node.is_none() { e.at(id.clone()) } else { e })
    }

    /// Synchronous invocation
    ///
    /// Fails with `TYPE_MISMATCH` when the target (or anything in its input
    /// cone, by construction of the flags) is async.
    pub fn invoke_sync(&self, id: &NodeId) -> ThunkResult {
        let scoped = !self.scope.lock().is_empty();
        if !scoped {
            if let Some(cached) = self.cache.lock().get(id) {
                return cached.clone();
            }
        }
        if self.flagged_async(id) {
            return Err(ThunkError::type_mismatch(
                "synchronous thunk",
                "async-flagged node",
            )
            .at(id.clone()));
        }
        let handler = self.handler_for(id)?;
        let outcome = match handler.evaluate_sync(self) {
            Some(outcome) => outcome,
            None => Err(ThunkError::type_mismatch(
                "handler with evaluate_sync",
                "async-only handler",
            )
            .at(id.clone())),
        };
        if !scoped {
            self.cache.lock().insert(id.clone(), outcome.clone());
        }
        outcome
    }

    /// Run `body` with an extra scope frame, popping on every exit path
    pub async fn with_frame<T>(
        &self,
        frame: Map<String, Value>,
        body: impl Future<Output = T>,
    ) -> T {
        self.scope.lock().push(frame);
        let out = body.await;
        self.scope.lock().pop();
        out
    }

    /// Resolve a scope binding, innermost frame first
    pub fn scope_lookup(&self, key: &str) -> Option<Value> {
        let scope = self.scope.lock();
        scope.iter().rev().find_map(|frame| frame.get(key).cloned())
    }

    /// The transition type currently in scope, if any
    pub fn transition_type(&self) -> Option<String> {
        self.scope_lookup(crate::thunk::SCOPE_TRANSITION_TYPE)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Build an effect context over this evaluation's channels
    pub fn effect_context(&self, transition_type: String) -> EffectContext {
        EffectContext::new(
            transition_type,
            self.request.user.clone(),
            self.answers.clone(),
            Arc::clone(&self.data),
            Arc::clone(&self.intents),
        )
    }

    /// Captured answer intents so far (cloned; commit happens in the
    /// controller)
    pub fn intents(&self) -> AnswerIntents {
        self.intents.lock().clone()
    }

    /// Instantiate a collection template as a runtime subtree
    ///
    /// Transforms the raw template in the `runtime_ast` space, normalizes it
    /// (`@self` resolves against the template's own fields before anything is
    /// registered), registers it into the overlay, re-runs the runtime
    /// wirers, cycle-checks the scoped subgraph and compiles handlers.
    /// Returns the subtree root.
    pub fn instantiate_template(&self, template: &Value) -> ThunkResult<NodeId> {
        let mut overlay = self.runtime.lock();

        let mut buffer = transform_runtime_template(template, &mut overlay.ids)
            .map_err(|e| ThunkError::evaluation_failed(format!("template transform: {e}")))?;
        ResolveSelfReferences
            .apply(&mut buffer, &mut overlay.ids)
            .map_err(|e| ThunkError::evaluation_failed(format!("template normalization: {e}")))?;
        let root = buffer.root().clone();

        // Register the subtree: overlay nodes with parents stamped.
        let mut new_ids = Vec::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            let Some(node) = buffer.take(&id) else { continue };
            let children = node.child_ids();
            for child in &children {
                overlay.meta.set_parent(child.clone(), id.clone());
            }
            new_ids.push(id.clone());
            overlay.nodes.insert(node);
            for child in children.into_iter().rev() {
                stack.push(child);
            }
        }

        // Wire and cycle-check the fresh subtree.
        {
            let RuntimeOverlay {
                nodes,
                meta,
                graph,
                ..
            } = &mut *overlay;
            let mut cx = WiringContext::runtime(nodes, meta, graph);
            for wirer in runtime_wirers() {
                wirer
                    .wire(&mut cx)
                    .map_err(|e| ThunkError::evaluation_failed(format!("template wiring: {e}")))?;
            }
        }
        let scope: HashSet<NodeId> = new_ids.iter().cloned().collect();
        overlay
            .graph
            .scoped_sort(&scope)
            .map_err(|e| ThunkError::evaluation_failed(format!("template ordering: {e}")))?;

        // Compile handlers for the whole overlay; handlers are stateless so
        // recompiling earlier instances is harmless.
        let handlers = compile_handlers(&overlay.nodes, &overlay.meta)
            .map_err(|e| ThunkError::evaluation_failed(format!("template handlers: {e}")))?;
        overlay.handlers = handlers;

        trace!(root = %root, nodes = new_ids.len(), "runtime subtree instantiated");
        Ok(root)
    }

    /// Validation nodes in scope for the current step's submission: compiled
    /// descendants of the step plus every validation inside runtime subtrees.
    pub fn step_validations(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .artifacts
            .nodes
            .of_kind(NodeKind::Expression(ExpressionKind::Validation))
            .iter()
            .filter(|id| self.artifacts.meta.is_descendant_of_step(id))
            .cloned()
            .collect();
        out.extend(
            self.runtime
                .lock()
                .nodes
                .of_kind(NodeKind::Expression(ExpressionKind::Validation))
                .iter()
                .cloned(),
        );
        out
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("evaluation_id", &self.evaluation_id)
            .field("url", &self.request.url)
            .finish_non_exhaustive()
    }
}
