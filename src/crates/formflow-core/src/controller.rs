//! Step controller
//!
//! Orchestrates one request against a compiled form:
//!
//! - **GET**: prefetch saved answers, run the onAccess chain (first non-pass
//!   outcome short-circuits to a redirect or error), run the onLoad chain,
//!   evaluate the step's block subtree, emit a
//!   [`RenderContext`](crate::render::RenderContext).
//! - **POST**: run onLoad, evaluate onAction transitions in order stopping at
//!   the first executed one, re-run the onLoad chain (action effects may have
//!   changed server data), then evaluate onSubmission transitions in order
//!   and act on the first entered one - commit captured answer intents
//!   through the store, then follow the resolved next target, re-render with
//!   validation messages, or surface a thrown error.
//! - **Autosave**: a pre-handler intercepts POSTs flagged `X-AAP-Autosave:
//!   true`, reshapes the body into `{key: string[]}` and writes through the
//!   store without touching onSubmission. It answers 204 or 500 and never
//!   renders.
//!
//! The controller owns commit points; effects only record intents.

use crate::compile::{CompiledForm, FormCache, FormCompiler};
use crate::error::{EngineError, Result};
use crate::eval::EvalContext;
use crate::functions::FunctionRegistry;
use crate::loader::JourneyDefinition;
use crate::render::RenderContext;
use crate::request::{Method, StepOutcome, StepRequest};
use crate::thunk::TransitionOutcome;
use formflow_store::{AnswerCommand, AnswerQuery, AnswerSet, AnswerStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives GET / POST / autosave for one journey definition
pub struct StepController {
    definition: JourneyDefinition,
    compiler: FormCompiler,
    cache: FormCache,
    store: Option<Arc<dyn AnswerStore>>,
}

impl StepController {
    /// Controller over a definition with the given function registry
    pub fn new(definition: JourneyDefinition, functions: Arc<FunctionRegistry>) -> Self {
        Self {
            definition,
            compiler: FormCompiler::new(functions),
            cache: FormCache::new(),
            store: None,
        }
    }

    /// Attach the external answer store
    pub fn with_store(mut self, store: Arc<dyn AnswerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Route one request
    pub async fn handle(&self, request: StepRequest) -> Result<StepOutcome> {
        if request.method == Method::Post && request.is_autosave() {
            return self.autosave(request).await;
        }
        match request.method {
            Method::Get => self.get(request).await,
            Method::Post => self.post(request).await,
        }
    }

    fn form(&self, request: &StepRequest) -> Result<Arc<CompiledForm>> {
        let step_path = request.url.split('?').next().unwrap_or(&request.url);
        Ok(self.cache.get_or_compile(
            &self.compiler,
            self.definition.raw(),
            self.definition.code(),
            step_path,
        )?)
    }

    async fn prefetch(&self, request: &StepRequest) -> Result<AnswerSet> {
        match (&self.store, &request.assessment_id) {
            (Some(store), Some(id)) => Ok(store
                .query(AnswerQuery::AssessmentVersionQuery { id: id.clone() })
                .await?),
            _ => Ok(AnswerSet::new()),
        }
    }

    /// Run the onAccess chain; the first non-pass outcome wins.
    async fn run_access(&self, form: &CompiledForm, cx: &EvalContext) -> Result<Option<StepOutcome>> {
        for transition in &form.on_access_chain {
            let outcome = cx.invoke(transition).await?;
            match TransitionOutcome::from_value(&outcome) {
                Some(TransitionOutcome::Redirect { location }) => {
                    debug!(%transition, %location, "access redirect");
                    return Ok(Some(StepOutcome::Redirect(location)));
                }
                Some(TransitionOutcome::Error { status, message }) => {
                    debug!(%transition, status, "access error");
                    return Ok(Some(StepOutcome::Error { status, message }));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    async fn run_load(&self, form: &CompiledForm, cx: &EvalContext, fresh: bool) -> Result<()> {
        for transition in &form.on_load_chain {
            if fresh {
                cx.invoke_fresh(transition).await?;
            } else {
                cx.invoke(transition).await?;
            }
        }
        Ok(())
    }

    async fn render(
        &self,
        form: &CompiledForm,
        cx: &EvalContext,
        validations: Vec<crate::render::ValidationRecord>,
    ) -> Result<StepOutcome> {
        let page = cx.invoke(&form.step_id).await?;
        Ok(StepOutcome::Render(RenderContext {
            journey: form.journey_code.clone(),
            step: form.step_path.clone(),
            page,
            validations,
        }))
    }

    /// GET: access gates, load chain, render tree.
    pub async fn get(&self, request: StepRequest) -> Result<StepOutcome> {
        let form = self.form(&request)?;
        let answers = self.prefetch(&request).await?;
        let cx = form.evaluation(request, answers);

        if let Some(short_circuit) = self.run_access(&form, &cx).await? {
            return Ok(short_circuit);
        }
        self.run_load(&form, &cx, false).await?;
        self.render(&form, &cx, Vec::new()).await
    }

    /// POST: actions, submissions, commit, outcome mapping.
    pub async fn post(&self, request: StepRequest) -> Result<StepOutcome> {
        let form = self.form(&request)?;
        let answers = self.prefetch(&request).await?;
        let assessment_id = request.assessment_id.clone();
        let user = request.user.clone();
        let cx = form.evaluation(request, answers);

        self.run_load(&form, &cx, false).await?;

        // First-match action execution.
        let mut acted = false;
        for action in &form.on_action {
            let outcome = cx.invoke_fresh(action).await?;
            if matches!(
                TransitionOutcome::from_value(&outcome),
                Some(TransitionOutcome::Action { executed: true })
            ) {
                debug!(%action, "action executed");
                acted = true;
                break;
            }
        }
        if acted {
            // Action effects may have repopulated server data.
            self.run_load(&form, &cx, true).await?;
        }

        for submission in &form.on_submission {
            let outcome = cx.invoke_fresh(submission).await?;
            let Some(TransitionOutcome::Submit {
                entered: true,
                goto,
                status,
                message,
                validations,
                ..
            }) = TransitionOutcome::from_value(&outcome)
            else {
                continue;
            };

            self.commit(&cx, assessment_id.as_deref(), user.clone()).await?;

            if let Some(status) = status {
                return Ok(StepOutcome::Error {
                    status,
                    message: message.unwrap_or_default(),
                });
            }
            if !validations.is_empty() {
                info!(step = %form.step_path, triggered = validations.len(), "submission invalid");
                return self.render(&form, &cx, validations).await;
            }
            if let Some(goto) = goto {
                return Ok(StepOutcome::Redirect(goto));
            }
            // Valid submission with no resolved target: stay on the step.
            return self.render(&form, &cx, Vec::new()).await;
        }

        // No submission entered; render the step again.
        self.render(&form, &cx, Vec::new()).await
    }

    /// Commit captured answer intents through the store.
    async fn commit(
        &self,
        cx: &EvalContext,
        assessment_id: Option<&str>,
        user: Option<String>,
    ) -> Result<()> {
        let intents = cx.intents();
        if intents.is_empty() {
            return Ok(());
        }
        let (Some(store), Some(id)) = (&self.store, assessment_id) else {
            warn!("answer intents captured but no store/assessment to commit to");
            return Ok(());
        };
        store
            .command(AnswerCommand::update(
                id,
                intents.added,
                intents.removed,
                false,
                user,
            ))
            .await
            .map_err(EngineError::Store)
    }

    /// Autosave write-through: `{key: string[]}`, 204 or 500, no render.
    pub async fn autosave(&self, request: StepRequest) -> Result<StepOutcome> {
        let (Some(store), Some(id)) = (&self.store, request.assessment_id.clone()) else {
            return Ok(StepOutcome::Error {
                status: 500,
                message: "autosave requires an answer store and assessment".to_string(),
            });
        };

        let added = request
            .post
            .iter()
            .map(|(key, value)| (key.clone(), to_string_list(value)))
            .collect();

        match store
            .command(AnswerCommand::update(
                id,
                added,
                Vec::new(),
                true,
                request.user.clone(),
            ))
            .await
        {
            Ok(()) => Ok(StepOutcome::NoContent),
            Err(e) => {
                warn!(error = %e, "autosave write failed");
                Ok(StepOutcome::Error {
                    status: 500,
                    message: "autosave failed".to_string(),
                })
            }
        }
    }
}

/// Reshape a posted value into the `{key: string[]}` autosave contract
fn to_string_list(value: &Value) -> Value {
    let list: Vec<Value> = match value {
        Value::Array(items) => items
            .iter()
            .map(|v| Value::String(crate::thunk::stringify(v)))
            .collect(),
        other => vec![Value::String(crate::thunk::stringify(other))],
    };
    Value::Array(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_string_list_shapes() {
        assert_eq!(to_string_list(&json!("x")), json!(["x"]));
        assert_eq!(to_string_list(&json!(["a", "b"])), json!(["a", "b"]));
        assert_eq!(to_string_list(&json!(7)), json!(["7"]));
    }
}
