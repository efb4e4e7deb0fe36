//! # formflow-core - Declarative Form Journeys as Executable Graphs
//!
//! Compiles a JSON-shaped form definition - a tree of journeys, steps, blocks
//! and embedded expressions - into an executable artifact: a directed
//! dependency graph of thunks whose evaluation produces both the rendered
//! page for one step and the transitions that drive navigation, validation
//! and side effects.
//!
//! ## Pipeline
//!
//! ```text
//!  JSON definition
//!       |
//!       v
//!  ┌───────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────┐
//!  │ transform │──▶│ normalize  │──▶│ register     │──▶│ wire      │
//!  │ (AST)     │   │ (@self)    │   │ (+ pseudo)   │   │ (edges)   │
//!  └───────────┘   └────────────┘   └──────────────┘   └───────────┘
//!                                                            │
//!       ┌────────────────────────────────────────────────────┘
//!       v
//!  ┌───────────┐   ┌──────────────┐   ┌──────────────────────────┐
//!  │ topo sort │──▶│ thunk        │──▶│ CompiledForm             │
//!  │ (cycles)  │   │ handlers     │   │ evaluate per request     │
//!  └───────────┘   │ (+ isAsync)  │   │ render / submit / effect │
//!                  └──────────────┘   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use formflow_core::{FormCompiler, FunctionRegistry, StepRequest};
//! use formflow_store::AnswerSet;
//! use std::sync::Arc;
//!
//! let mut functions = FunctionRegistry::new();
//! functions.register_condition("isPresent", |args| {
//!     args.first().map(|v| !v.is_null()).unwrap_or(false)
//! });
//!
//! let compiler = FormCompiler::new(Arc::new(functions));
//! let form = compiler.compile(&definition, "/intake/name")?;
//!
//! let cx = form.evaluation(StepRequest::get("/intake/name"), AnswerSet::new());
//! let page = cx.invoke(&form.step_id).await?;
//! ```
//!
//! For the request-level orchestration (access gates, load chains, actions,
//! submissions, autosave) use [`StepController`] with a
//! [`JourneyDefinition`] and an answer store from `formflow-store`.
//!
//! ## Module Organization
//!
//! ### Compile time
//! - [`ast`] - node model, identifiers, the pre-registration buffer
//! - [`transform`] - JSON to AST recursive descent
//! - [`normalize`] - in-place rewrites (`@self` resolution)
//! - [`register`] - registration walk, metadata, pseudo-node synthesis
//! - [`wiring`] - pluggable dependency wirers
//! - [`graph`] - typed multigraph, topological sort, scoped re-sort
//! - [`compile`] - the pipeline and the compiled artifact
//!
//! ### Evaluation
//! - [`thunk`] - one handler per node kind, two-pass async inference
//! - [`eval`] - evaluation context, invoker, runtime subtree hooks
//! - [`functions`] - registered conditions / transformers / generators /
//!   effects and the effect context
//!
//! ### Request surface
//! - [`request`] - the request snapshot and step outcomes
//! - [`render`] - the evaluated render tree
//! - [`controller`] - GET / POST / autosave orchestration
//! - [`adapter`] - host framework seam
//! - [`components`] - variant-keyed block renderers
//! - [`loader`] - JSON / YAML definition loading
//! - [`viz`] - DOT / Mermaid graph rendering
//! - [`error`] - compile and evaluation error types

pub mod adapter;
pub mod ast;
pub mod compile;
pub mod components;
pub mod controller;
pub mod error;
pub mod eval;
pub mod functions;
pub mod graph;
pub mod loader;
pub mod normalize;
pub mod register;
pub mod registry;
pub mod render;
pub mod request;
pub mod thunk;
pub mod transform;
pub mod viz;
pub mod wiring;

// Re-export main types
pub use adapter::FrameworkAdapter;
pub use ast::{
    AstBuffer, AstNode, ExpressionKind, FunctionKind, IdGenerator, IdSpace, IterateKind, NodeId,
    NodeKind, PredicateKind, PropertyValue, PseudoKind, StructureKind, TransitionKind,
};
pub use compile::{CompiledForm, FormCache, FormCompiler};
pub use components::ComponentRegistry;
pub use controller::StepController;
pub use error::{CompileError, EngineError, Result, ThunkError, ThunkErrorKind, ThunkResult};
pub use eval::{CompiledArtifacts, EvalContext};
pub use functions::{AnswerIntents, EffectContext, FunctionCall, FunctionRegistry};
pub use graph::{DepGraph, Edge, EdgeKind};
pub use loader::JourneyDefinition;
pub use normalize::{Normalizer, ResolveSelfReferences};
pub use register::{register, Registration};
pub use registry::{MetadataRegistry, MetaKey, MetaValue, NodeRegistry, ScopeInfo};
pub use render::{RenderContext, ValidationRecord};
pub use request::{Method, StepOutcome, StepRequest, AUTOSAVE_HEADER};
pub use thunk::{HandlerRegistry, ThunkHandler, TransitionOutcome};
pub use transform::transform;
pub use viz::{visualize, VisualizationFormat};
pub use wiring::{Wirer, WiringContext};
