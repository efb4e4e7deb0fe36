//! Form compilation pipeline
//!
//! [`FormCompiler`] runs the full compile-time pipeline for one (definition,
//! step path) pair:
//!
//! ```text
//! JSON definition
//!   -> transform        (ast buffer, compile_ast ids)
//!   -> normalize        (@self resolution, in place)
//!   -> register         (node registry, metadata, pseudo nodes)
//!   -> wire             (typed dependency edges)
//!   -> topological sort (cycle check, deterministic order)
//!   -> compile handlers (one per node, totality checked)
//!   -> infer async      (two passes done: flags in topo order)
//!   -> CompiledForm
//! ```
//!
//! A [`CompiledForm`] is immutable and shared across requests; per-request
//! state lives in the [`EvalContext`] it hands out. [`FormCache`] memoizes
//! compiled forms per step, since registration marks the current step and the
//! artifact is therefore step-specific.

use crate::ast::IdGenerator;
use crate::error::{CompileError, CompileResult};
use crate::eval::{CompiledArtifacts, EvalContext};
use crate::functions::FunctionRegistry;
use crate::graph::DepGraph;
use crate::normalize::{Normalizer, ResolveSelfReferences};
use crate::register::{register, transition_chain, Registration};
use crate::registry::{MetadataRegistry, NodeRegistry};
use crate::request::StepRequest;
use crate::thunk::{compile_handlers, infer_async_flags, HandlerRegistry};
use crate::transform::transform;
use crate::wiring::{default_wirers, Wirer, WiringContext};
use crate::ast::NodeId;
use formflow_store::AnswerSet;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The executable artifact for one step of one journey
pub struct CompiledForm {
    /// Journey code from the definition root
    pub journey_code: String,
    /// The step this artifact was compiled for
    pub step_path: String,
    /// The current step node
    pub step_id: NodeId,
    /// Full topological order of the graph
    pub order: Vec<NodeId>,
    /// onLoad transitions along the step's ancestry, execution order
    pub on_load_chain: Vec<NodeId>,
    /// onAccess transitions along the step's ancestry, execution order
    pub on_access_chain: Vec<NodeId>,
    /// The step's onAction transitions, declaration order
    pub on_action: Vec<NodeId>,
    /// The step's onSubmission transitions, declaration order
    pub on_submission: Vec<NodeId>,
    nodes: Arc<NodeRegistry>,
    meta: Arc<MetadataRegistry>,
    graph: Arc<DepGraph>,
    handlers: Arc<HandlerRegistry>,
    functions: Arc<FunctionRegistry>,
}

impl CompiledForm {
    /// The frozen node store
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    /// The stamped metadata
    pub fn meta(&self) -> &MetadataRegistry {
        &self.meta
    }

    /// The wired dependency graph
    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    /// The compiled handler set
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Start an evaluation of this form for one request
    pub fn evaluation(&self, request: StepRequest, answers: AnswerSet) -> EvalContext {
        EvalContext::new(
            CompiledArtifacts {
                nodes: Arc::clone(&self.nodes),
                meta: Arc::clone(&self.meta),
                graph: Arc::clone(&self.graph),
                handlers: Arc::clone(&self.handlers),
                functions: Arc::clone(&self.functions),
                step_id: self.step_id.clone(),
            },
            request,
            answers,
        )
    }
}

impl std::fmt::Debug for CompiledForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledForm")
            .field("journey_code", &self.journey_code)
            .field("step_path", &self.step_path)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.graph.edge_count())
            .finish()
    }
}

/// Runs the compile pipeline
pub struct FormCompiler {
    functions: Arc<FunctionRegistry>,
    normalizers: Vec<Box<dyn Normalizer>>,
    wirers: Vec<Box<dyn Wirer>>,
}

impl FormCompiler {
    /// Compiler with the default normalizer and wirer sets
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Self {
            functions,
            normalizers: vec![Box::new(ResolveSelfReferences)],
            wirers: default_wirers(),
        }
    }

    /// Append a custom normalizer
    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer>) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    /// Append a custom wirer
    pub fn with_wirer(mut self, wirer: Box<dyn Wirer>) -> Self {
        self.wirers.push(wirer);
        self
    }

    /// Compile one definition for one step path
    pub fn compile(&self, definition: &Value, step_path: &str) -> CompileResult<CompiledForm> {
        let mut ids = IdGenerator::new();

        let mut buffer = transform(definition, &mut ids)?;
        for normalizer in &self.normalizers {
            debug!(pass = normalizer.name(), "normalizing");
            normalizer.apply(&mut buffer, &mut ids)?;
        }

        let Registration {
            nodes,
            meta,
            step_id,
        } = register(buffer, step_path, &mut ids)?;

        let mut graph = DepGraph::new();
        {
            let mut cx = WiringContext::new(&nodes, &meta, &mut graph, step_id.clone());
            for wirer in &self.wirers {
                debug!(pass = wirer.name(), "wiring");
                wirer.wire(&mut cx)?;
            }
        }

        let order = graph.topological_sort()?;
        let mut handlers = compile_handlers(&nodes, &meta)?;
        infer_async_flags(&mut handlers, &order, &graph, &self.functions);

        let journey_code = nodes
            .root()
            .and_then(|root| nodes.get(root))
            .and_then(|n| n.string("code"))
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: "journey".to_string(),
                message: "journey root has no code".to_string(),
            })?
            .to_string();

        let step_node = nodes.get(&step_id).expect("step is registered");
        let on_action = step_node.node_items("onAction");
        let on_submission = step_node.node_items("onSubmission");
        let on_load_chain = transition_chain(&nodes, &meta, &step_id, "onLoad");
        let on_access_chain = transition_chain(&nodes, &meta, &step_id, "onAccess");

        info!(
            journey = %journey_code,
            step = step_path,
            nodes = nodes.len(),
            edges = graph.edge_count(),
            "form compiled"
        );
        Ok(CompiledForm {
            journey_code,
            step_path: step_path.to_string(),
            step_id,
            order,
            on_load_chain,
            on_access_chain,
            on_action,
            on_submission,
            nodes: Arc::new(nodes),
            meta: Arc::new(meta),
            graph: Arc::new(graph),
            handlers: Arc::new(handlers),
            functions: Arc::clone(&self.functions),
        })
    }
}

/// Step-keyed cache of compiled forms
#[derive(Default)]
pub struct FormCache {
    entries: Mutex<HashMap<(String, String), Arc<CompiledForm>>>,
}

impl FormCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile-or-reuse the artifact for `(journey_code, step_path)`
    pub fn get_or_compile(
        &self,
        compiler: &FormCompiler,
        definition: &Value,
        journey_code: &str,
        step_path: &str,
    ) -> CompileResult<Arc<CompiledForm>> {
        let key = (journey_code.to_string(), step_path.to_string());
        if let Some(form) = self.entries.lock().get(&key) {
            return Ok(Arc::clone(form));
        }
        let form = Arc::new(compiler.compile(definition, step_path)?);
        self.entries
            .lock()
            .insert(key, Arc::clone(&form));
        Ok(form)
    }

    /// Number of cached artifacts
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every cached artifact
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "code": "intake",
            "path": "/intake",
            "steps": [
                {
                    "path": "/intake/name",
                    "blocks": [
                        {
                            "variant": "text-input",
                            "code": "firstName",
                            "label": {
                                "type": "format",
                                "template": "%1",
                                "arguments": ["First name"]
                            }
                        }
                    ],
                    "onSubmission": [{
                        "type": "transition.submit",
                        "validate": false,
                        "onValid": {"next": [{"type": "next", "goto": "/intake/done"}]}
                    }]
                },
                {"path": "/intake/done", "blocks": [{"variant": "confirmation"}]}
            ]
        })
    }

    fn compiler() -> FormCompiler {
        FormCompiler::new(Arc::new(FunctionRegistry::new()))
    }

    #[test]
    fn test_compile_produces_total_handler_coverage() {
        let form = compiler().compile(&fixture(), "/intake/name").unwrap();
        // Totality is asserted inside compile; double-check the counts line up
        assert_eq!(form.handlers().len(), form.nodes().len());
        assert_eq!(form.journey_code, "intake");
    }

    #[test]
    fn test_topological_order_is_a_permutation() {
        let form = compiler().compile(&fixture(), "/intake/name").unwrap();
        assert_eq!(form.order.len(), form.nodes().len());
        let mut seen = form.order.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), form.order.len());
    }

    #[test]
    fn test_sync_flags_require_sync_input_cones() {
        let form = compiler().compile(&fixture(), "/intake/name").unwrap();
        let handlers = form.handlers();
        for id in &form.order {
            if !handlers.is_async(id) {
                for pred in form.graph().scheduling_predecessors(id) {
                    assert!(
                        !handlers.is_async(pred),
                        "sync node {id} has async input {pred}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_self_default_cycle_is_a_compile_error() {
        // A field whose default value reads its own answer closes a cycle
        // through the local answer pseudo node.
        let definition = json!({
            "code": "cyclic",
            "path": "/c",
            "steps": [{
                "path": "/c/s",
                "blocks": [{
                    "variant": "text-input",
                    "code": "loop",
                    "defaultValue": {"type": "reference", "path": ["answers", "@self"]}
                }]
            }]
        });
        let err = compiler().compile(&definition, "/c/s").unwrap_err();
        assert!(matches!(err, CompileError::CyclicDependency { .. }));
    }

    #[test]
    fn test_cache_reuses_per_step_artifacts() {
        let cache = FormCache::new();
        let compiler = compiler();
        let definition = fixture();

        let a = cache
            .get_or_compile(&compiler, &definition, "intake", "/intake/name")
            .unwrap();
        let b = cache
            .get_or_compile(&compiler, &definition, "intake", "/intake/name")
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = cache
            .get_or_compile(&compiler, &definition, "intake", "/intake/done")
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(cache.len(), 2);
    }
}
