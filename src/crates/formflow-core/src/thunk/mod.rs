//! Thunk handlers
//!
//! Every registered node compiles into exactly one handler: the object that
//! knows how to evaluate that node against an [`EvalContext`]. Handlers are
//! constructed in a single pass over the registry ([`compile_handlers`]) and
//! pull everything they can out of the node up front - property shapes are
//! validated at compile time, so evaluation never re-parses the AST.
//!
//! # Contracts
//!
//! - [`ThunkHandler::evaluate`] is the mandatory async entry point, returning
//!   the node's value or a typed [`ThunkError`](crate::error::ThunkError).
//! - [`ThunkHandler::evaluate_sync`] is an optional narrowed entry point;
//!   handlers that can complete without suspending implement it and the
//!   invoker uses it only when the whole transitive input cone is sync.
//! - [`ThunkHandler::infer_async`] feeds the second compilation pass: walking
//!   the graph in topological order, each handler decides its own async flag
//!   from its inputs' flags plus whatever externals it calls. The default is
//!   async-safe (true).
//!
//! # Value conventions
//!
//! Evaluation speaks JSON. The engine has no `undefined`; absent values are
//! `null`, and truthiness follows the definition language: `null`, `false`,
//! `0`, and `""` are falsy, everything else (including empty arrays and
//! objects) is truthy.

mod format;
mod function;
mod iterate;
mod outcome;
mod pipeline;
mod predicate;
mod pseudo;
mod reference;
mod structure;
mod transition;
mod value;

pub use format::FormatHandler;
pub use function::{EffectHandler, FunctionHandler};
pub use iterate::{CollectionHandler, IterateHandler};
pub use outcome::{NextHandler, ThrowErrorHandler, ValidationHandler};
pub use pipeline::{ConditionalHandler, PipelineHandler};
pub use predicate::{CombinatorHandler, NotHandler, TestHandler};
pub use pseudo::PseudoHandler;
pub use reference::ReferenceHandler;
pub use structure::StructureHandler;
pub use transition::{
    AccessHandler, ActionHandler, LoadHandler, SubmitHandler, TransitionOutcome, SCOPE_TRANSITION_TYPE,
};
pub use value::{escape_html, is_truthy, stringify};

use crate::ast::{NodeId, NodeKind};
use crate::error::{CompileError, CompileResult, ThunkError, ThunkResult};
use crate::eval::EvalContext;
use crate::functions::FunctionRegistry;
use crate::graph::DepGraph;
use crate::registry::{MetadataRegistry, NodeRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Inputs to the per-handler async decision
pub struct AsyncProbe<'a> {
    /// True when any scheduling predecessor is async
    pub inputs_async: bool,
    /// For checking registered functions' flags
    pub functions: &'a FunctionRegistry,
}

/// The compiled evaluator of one node
#[async_trait]
pub trait ThunkHandler: Send + Sync {
    /// The node this handler evaluates
    fn id(&self) -> &NodeId;

    /// Evaluate the node
    async fn evaluate(&self, cx: &EvalContext) -> ThunkResult;

    /// Synchronous evaluation, when this handler supports it
    ///
    /// `None` means "async only"; the invoker turns that into a
    /// `TYPE_MISMATCH` error on a sync invocation path.
    fn evaluate_sync(&self, _cx: &EvalContext) -> Option<ThunkResult> {
        None
    }

    /// Decide the async flag from the probe; the default is async-safe
    fn infer_async(&self, _probe: &AsyncProbe<'_>) -> bool {
        true
    }
}

/// `id -> handler` mapping plus the inferred async flags
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeId, Arc<dyn ThunkHandler>>,
    flags: HashMap<NodeId, bool>,
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler
    pub fn insert(&mut self, handler: Arc<dyn ThunkHandler>) {
        self.handlers.insert(handler.id().clone(), handler);
    }

    /// Handler lookup
    pub fn get(&self, id: &NodeId) -> Option<&Arc<dyn ThunkHandler>> {
        self.handlers.get(id)
    }

    /// Handler lookup, failing with a typed error
    pub fn require(&self, id: &NodeId) -> ThunkResult<Arc<dyn ThunkHandler>> {
        self.handlers.get(id).cloned().ok_or_else(|| {
            ThunkError::lookup_failed(format!("no handler compiled for node {id}"))
        })
    }

    /// Inferred async flag; unknown ids default to async-safe
    pub fn is_async(&self, id: &NodeId) -> bool {
        self.flags.get(id).copied().unwrap_or(true)
    }

    /// Record an inferred flag
    pub fn set_async(&mut self, id: NodeId, is_async: bool) {
        self.flags.insert(id, is_async);
    }

    /// Number of compiled handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no handlers were compiled
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Check the registry is total over a node registry
    pub fn assert_covers(&self, nodes: &NodeRegistry) -> CompileResult<()> {
        for id in nodes.ids() {
            if !self.handlers.contains_key(id) {
                return Err(CompileError::MissingHandler { node: id.clone() });
            }
        }
        Ok(())
    }
}

/// Pass 1: build one handler per registered node.
pub fn compile_handlers(
    nodes: &NodeRegistry,
    meta: &MetadataRegistry,
) -> CompileResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    for id in nodes.ids() {
        let node = nodes.get(id).expect("ids() only yields registered nodes");
        let handler: Arc<dyn ThunkHandler> = match node.kind {
            NodeKind::Structure(_) => Arc::new(StructureHandler::new(node, nodes)?),
            NodeKind::Expression(kind) => {
                use crate::ast::ExpressionKind::*;
                match kind {
                    Reference => Arc::new(ReferenceHandler::new(node)?),
                    Format => Arc::new(FormatHandler::new(node)?),
                    Pipeline => Arc::new(PipelineHandler::new(node, nodes)?),
                    Conditional => Arc::new(ConditionalHandler::new(node)?),
                    Iterate(kind) => Arc::new(IterateHandler::new(node, kind)?),
                    Collection => Arc::new(CollectionHandler::new(node)?),
                    Function(crate::ast::FunctionKind::Effect) => {
                        Arc::new(EffectHandler::new(node)?)
                    }
                    Function(kind) => Arc::new(FunctionHandler::new(node, kind)?),
                    Validation => Arc::new(ValidationHandler::new(node, nodes, meta)?),
                    Next => Arc::new(NextHandler::new(node)?),
                    ThrowError => Arc::new(ThrowErrorHandler::new(node)?),
                }
            }
            NodeKind::Predicate(kind) => {
                use crate::ast::PredicateKind::*;
                match kind {
                    Test => Arc::new(TestHandler::new(node, nodes)?),
                    Not => Arc::new(NotHandler::new(node)?),
                    And | Or | Xor => Arc::new(CombinatorHandler::new(node, kind)?),
                }
            }
            NodeKind::Transition(kind) => {
                use crate::ast::TransitionKind::*;
                match kind {
                    Load => Arc::new(LoadHandler::new(node)?),
                    Access => Arc::new(AccessHandler::new(node)?),
                    Action => Arc::new(ActionHandler::new(node)?),
                    Submit => Arc::new(SubmitHandler::new(node, nodes, meta)?),
                }
            }
            NodeKind::Pseudo(kind) => Arc::new(PseudoHandler::new(node, kind, nodes, meta)?),
        };
        registry.insert(handler);
    }
    registry.assert_covers(nodes)?;
    Ok(registry)
}

/// Pass 2: infer async flags in topological order, so each handler sees the
/// finished flags of everything it depends on.
pub fn infer_async_flags(
    registry: &mut HandlerRegistry,
    order: &[NodeId],
    graph: &DepGraph,
    functions: &FunctionRegistry,
) {
    for id in order {
        let inputs_async = graph
            .scheduling_predecessors(id)
            .any(|pred| registry.is_async(pred));
        let flag = registry
            .get(id)
            .map(|handler| {
                handler.infer_async(&AsyncProbe {
                    inputs_async,
                    functions,
                })
            })
            .unwrap_or(true);
        registry.set_async(id.clone(), flag);
    }
}
