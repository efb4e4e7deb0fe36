//! End-to-end tests: definition JSON through compilation, evaluation and the
//! step controller.

use formflow_core::{
    ExpressionKind, FormCompiler, FunctionRegistry, JourneyDefinition, NodeKind, StepController,
    StepOutcome, StepRequest, ThunkError,
};
use formflow_store::{AnswerQuery, AnswerStore, InMemoryAnswerStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn age_journey() -> JourneyDefinition {
    JourneyDefinition::new(json!({
        "code": "intake",
        "path": "/intake",
        "steps": [
            {
                "path": "/intake/age",
                "blocks": [{
                    "variant": "number-input",
                    "code": "age",
                    "validate": [{
                        "type": "validation",
                        "when": {
                            "type": "predicate.test",
                            "subject": {"type": "reference", "path": ["answers", "@self"]},
                            "condition": "isUnder18"
                        },
                        "message": {
                            "type": "format",
                            "template": "You must be %1 or over",
                            "arguments": ["18"]
                        }
                    }]
                }],
                "onSubmission": [{
                    "type": "transition.submit",
                    "validate": true,
                    "onValid": {
                        "effects": [{
                            "type": "function.effect",
                            "name": "saveAge",
                            "arguments": [{"type": "reference", "path": ["answers", "age"]}]
                        }],
                        "next": [{"type": "next", "goto": "/intake/done"}]
                    },
                    "onInvalid": {
                        "next": [{"type": "next", "goto": "/intake/age"}]
                    }
                }]
            },
            {"path": "/intake/done", "blocks": [{"variant": "confirmation"}]}
        ]
    }))
    .unwrap()
}

fn age_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_condition("isUnder18", |args| {
        args.first()
            .map(|v| match v {
                Value::String(s) => s.parse::<i64>().map(|n| n < 18).unwrap_or(true),
                Value::Number(n) => n.as_i64().map(|n| n < 18).unwrap_or(true),
                _ => true,
            })
            .unwrap_or(true)
    });
    functions.register_effect("saveAge", |context, args| {
        Box::pin(async move {
            context.record_answer("age", args.first().cloned().unwrap_or(Value::Null));
            Ok(Value::Null)
        })
    });
    functions
}

#[tokio::test]
async fn test_invalid_submission_re_renders_with_message() {
    let controller = StepController::new(age_journey(), Arc::new(age_functions()));
    let request = StepRequest::post(
        "/intake/age",
        HashMap::from([("age".to_string(), json!("17"))]),
    );

    let outcome = controller.handle(request).await.unwrap();
    match outcome {
        StepOutcome::Render(context) => {
            assert_eq!(context.step, "/intake/age");
            assert!(context.has_validation_errors());
            assert_eq!(
                context.messages_for("age"),
                vec!["You must be 18 or over"]
            );
        }
        other => panic!("expected re-render, got {other:?}"),
    }
}

#[tokio::test]
async fn test_valid_submission_follows_next_and_commits() {
    let store = Arc::new(InMemoryAnswerStore::new());
    let controller = StepController::new(age_journey(), Arc::new(age_functions()))
        .with_store(Arc::clone(&store) as Arc<dyn AnswerStore>);

    let request = StepRequest::post(
        "/intake/age",
        HashMap::from([("age".to_string(), json!("21"))]),
    )
    .with_assessment("a1")
    .with_user("practitioner");

    let outcome = controller.handle(request).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Redirect(ref target) if target == "/intake/done"));

    // The onValid effect recorded an intent; the controller committed it.
    let saved = store
        .query(AnswerQuery::AssessmentVersionQuery {
            id: "a1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(saved.answers["age"], json!("21"));

    let history = store.history().await;
    assert_eq!(history.len(), 1);
    assert!(!history[0].autosave);
    assert_eq!(history[0].user.as_deref(), Some("practitioner"));
}

#[tokio::test]
async fn test_get_renders_saved_answer_into_field_value() {
    let store = Arc::new(InMemoryAnswerStore::new());
    store
        .seed("a1", HashMap::from([("age".to_string(), json!("44"))]))
        .await;
    let controller = StepController::new(age_journey(), Arc::new(age_functions()))
        .with_store(Arc::clone(&store) as Arc<dyn AnswerStore>);

    let outcome = controller
        .handle(StepRequest::get("/intake/age").with_assessment("a1"))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };
    assert_eq!(context.page["blocks"][0]["code"], json!("age"));
    assert_eq!(context.page["blocks"][0]["value"], json!("44"));
    assert!(!context.has_validation_errors());
}

#[tokio::test]
async fn test_format_escapes_arguments_end_to_end() {
    let definition = JourneyDefinition::new(json!({
        "code": "escape",
        "path": "/e",
        "steps": [{
            "path": "/e/s",
            "blocks": [{
                "variant": "heading",
                "text": {
                    "type": "format",
                    "template": "<h2>%1</h2>",
                    "arguments": [{"type": "reference", "path": ["query", "title"]}]
                }
            }]
        }]
    }))
    .unwrap();

    let controller = StepController::new(definition, Arc::new(FunctionRegistry::new()));
    let outcome = controller
        .handle(StepRequest::get("/e/s").with_query("title", json!("Drugs & alcohol")))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };
    assert_eq!(
        context.page["blocks"][0]["text"],
        json!("<h2>Drugs &amp; alcohol</h2>")
    );
}

#[tokio::test]
async fn test_and_fails_closed_and_short_circuits() {
    static SECOND_CALLS: AtomicUsize = AtomicUsize::new(0);

    let mut functions = FunctionRegistry::new();
    functions.register_sync(
        "explodes",
        formflow_core::FunctionKind::Condition,
        |_| Err(ThunkError::evaluation_failed("boom")),
    );
    functions.register_condition("countsAnd", |_| {
        SECOND_CALLS.fetch_add(1, Ordering::SeqCst);
        true
    });
    functions.register_condition("alwaysTrue", |_| true);

    let definition = JourneyDefinition::new(json!({
        "code": "preds",
        "path": "/p",
        "steps": [{
            "path": "/p/s",
            "blocks": [{
                "variant": "debug",
                "conjunction": {
                    "type": "predicate.and",
                    "operands": [
                        {"type": "predicate.test", "subject": "x", "condition": "explodes"},
                        {"type": "predicate.test", "subject": "x", "condition": "countsAnd"}
                    ]
                },
                "disjunction": {
                    "type": "predicate.or",
                    "operands": [
                        {"type": "predicate.test", "subject": "x", "condition": "explodes"},
                        {"type": "predicate.test", "subject": "x", "condition": "alwaysTrue"}
                    ]
                }
            }]
        }]
    }))
    .unwrap();

    let controller = StepController::new(definition, Arc::new(functions));
    let outcome = controller.handle(StepRequest::get("/p/s")).await.unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };

    // AND: failed operand closes the gate, second operand never runs.
    assert_eq!(context.page["blocks"][0]["conjunction"], json!(false));
    assert_eq!(SECOND_CALLS.load(Ordering::SeqCst), 0);
    // OR: the failure is skipped and the truthy operand wins.
    assert_eq!(context.page["blocks"][0]["disjunction"], json!(true));
}

fn people_journey(block_extra: Value) -> JourneyDefinition {
    let mut block = json!({"variant": "summary"});
    for (key, value) in block_extra.as_object().unwrap() {
        block[key.clone()] = value.clone();
    }
    JourneyDefinition::new(json!({
        "code": "people",
        "path": "/people",
        "steps": [{
            "path": "/people/list",
            "blocks": [block],
            "onLoad": [{
                "type": "transition.load",
                "effects": [{"type": "function.effect", "name": "loadPeople"}]
            }]
        }]
    }))
    .unwrap()
}

fn people_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_effect("loadPeople", |context, _args| {
        Box::pin(async move {
            context.put_data("people", json!([{"name": "a"}, {"name": "b"}]));
            Ok(Value::Null)
        })
    });
    functions
}

#[tokio::test]
async fn test_iterator_map_binds_scope_per_item() {
    let definition = people_journey(json!({
        "names": {
            "type": "iterator.map",
            "source": {"type": "reference", "path": ["data", "people"]},
            "transform": {
                "type": "format",
                "template": "%1",
                "arguments": [{"type": "reference", "path": ["@scope", "name"]}]
            }
        }
    }));
    let controller = StepController::new(definition, Arc::new(people_functions()));
    let outcome = controller
        .handle(StepRequest::get("/people/list"))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };
    assert_eq!(context.page["blocks"][0]["names"], json!(["a", "b"]));
}

#[tokio::test]
async fn test_collection_instantiates_runtime_blocks_per_item() {
    let definition = people_journey(json!({
        "rows": {
            "type": "collection",
            "source": {"type": "reference", "path": ["data", "people"]},
            "template": {
                "variant": "row",
                "label": {
                    "type": "format",
                    "template": "%1 (#%2)",
                    "arguments": [
                        {"type": "reference", "path": ["@scope", "name"]},
                        {"type": "reference", "path": ["@scope", "@index"]}
                    ]
                }
            }
        }
    }));
    let controller = StepController::new(definition, Arc::new(people_functions()));
    let outcome = controller
        .handle(StepRequest::get("/people/list"))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };

    let rows = context.page["blocks"][0]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["variant"], json!("row"));
    assert_eq!(rows[0]["label"], json!("a (#0)"));
    assert_eq!(rows[1]["label"], json!("b (#1)"));
    // Runtime instances live in their own id space
    assert!(rows[0]["id"].as_str().unwrap().starts_with("runtime_ast:"));
}

fn household_journey() -> JourneyDefinition {
    // A repeatable member row whose template leans on @self for both its
    // rendered value and its own validation.
    JourneyDefinition::new(json!({
        "code": "household",
        "path": "/household",
        "steps": [
            {
                "path": "/household/members",
                "blocks": [{
                    "variant": "member-list",
                    "rows": {
                        "type": "collection",
                        "source": {"type": "reference", "path": ["data", "members"]},
                        "template": {
                            "variant": "member-row",
                            "code": "memberName",
                            "echo": {"type": "reference", "path": ["answers", "@self"]},
                            "validate": [{
                                "type": "validation",
                                "when": {
                                    "type": "predicate.test",
                                    "subject": {"type": "reference", "path": ["answers", "@self"]},
                                    "condition": "isBlank"
                                },
                                "message": "Enter a name"
                            }]
                        }
                    }
                }],
                "onLoad": [{
                    "type": "transition.load",
                    "effects": [{"type": "function.effect", "name": "loadMembers"}]
                }],
                "onSubmission": [{
                    "type": "transition.submit",
                    "validate": true,
                    "onValid": {"next": [{"type": "next", "goto": "/household/done"}]}
                }]
            },
            {"path": "/household/done", "blocks": [{"variant": "confirmation"}]}
        ]
    }))
    .unwrap()
}

fn household_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_effect("loadMembers", |context, _args| {
        Box::pin(async move {
            context.put_data("members", json!([{"position": "first"}, {"position": "second"}]));
            Ok(Value::Null)
        })
    });
    functions.register_condition("isBlank", |args| {
        args.first()
            .map(|v| v.is_null() || v.as_str().map(str::is_empty).unwrap_or(false))
            .unwrap_or(true)
    });
    functions
}

#[tokio::test]
async fn test_collection_template_self_resolves_to_own_field_value() {
    let store = Arc::new(InMemoryAnswerStore::new());
    store
        .seed(
            "a1",
            HashMap::from([("memberName".to_string(), json!("Ada"))]),
        )
        .await;
    let controller = StepController::new(household_journey(), Arc::new(household_functions()))
        .with_store(Arc::clone(&store) as Arc<dyn AnswerStore>);

    let outcome = controller
        .handle(StepRequest::get("/household/members").with_assessment("a1"))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };

    // @self inside the template resolved to the row field's own code, so
    // both the explicit reference and the field value read the saved answer
    // instead of silently evaluating to null.
    let rows = context.page["blocks"][0]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    for row in rows {
        assert_eq!(row["code"], json!("memberName"));
        assert_eq!(row["echo"], json!("Ada"));
        assert_eq!(row["value"], json!("Ada"));
    }
}

#[tokio::test]
async fn test_collection_template_self_validation_blocks_blank_submission() {
    let controller = StepController::new(household_journey(), Arc::new(household_functions()));

    // Nothing posted: every row's self-validation fires.
    let outcome = controller
        .handle(StepRequest::post("/household/members", HashMap::new()))
        .await
        .unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected re-render");
    };
    assert_eq!(
        context.messages_for("memberName"),
        vec!["Enter a name", "Enter a name"],
        "one record per instantiated row"
    );
}

#[tokio::test]
async fn test_collection_template_self_validation_passes_with_value() {
    let controller = StepController::new(household_journey(), Arc::new(household_functions()));

    let outcome = controller
        .handle(StepRequest::post(
            "/household/members",
            HashMap::from([("memberName".to_string(), json!("Ada"))]),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, StepOutcome::Redirect(ref target) if target == "/household/done"));
}

#[tokio::test]
async fn test_access_gate_redirects_before_render() {
    let mut functions = FunctionRegistry::new();
    functions.register_condition("alwaysTrue", |_| true);

    let definition = JourneyDefinition::new(json!({
        "code": "gated",
        "path": "/g",
        "steps": [{
            "path": "/g/secret",
            "blocks": [{"variant": "secret"}],
            "onAccess": [{
                "type": "transition.access",
                "when": {"type": "predicate.test", "subject": "x", "condition": "alwaysTrue"},
                "redirect": "/g/denied"
            }]
        }, {
            "path": "/g/denied",
            "blocks": [{"variant": "denied"}]
        }]
    }))
    .unwrap();

    let controller = StepController::new(definition, Arc::new(functions));
    let outcome = controller.handle(StepRequest::get("/g/secret")).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Redirect(ref target) if target == "/g/denied"));
}

#[tokio::test]
async fn test_access_gate_can_throw_status() {
    let mut functions = FunctionRegistry::new();
    functions.register_condition("alwaysTrue", |_| true);

    let definition = JourneyDefinition::new(json!({
        "code": "gated",
        "path": "/g",
        "steps": [{
            "path": "/g/secret",
            "blocks": [{"variant": "secret"}],
            "onAccess": [{
                "type": "transition.access",
                "when": {"type": "predicate.test", "subject": "x", "condition": "alwaysTrue"},
                "status": 403,
                "message": "No access"
            }]
        }]
    }))
    .unwrap();

    let controller = StepController::new(definition, Arc::new(functions));
    let outcome = controller.handle(StepRequest::get("/g/secret")).await.unwrap();
    match outcome {
        StepOutcome::Error { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "No access");
        }
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_autosave_writes_through_without_submitting() {
    let store = Arc::new(InMemoryAnswerStore::new());
    let controller = StepController::new(age_journey(), Arc::new(age_functions()))
        .with_store(Arc::clone(&store) as Arc<dyn AnswerStore>);

    let request = StepRequest::post(
        "/intake/age",
        HashMap::from([("age".to_string(), json!("17"))]),
    )
    .with_assessment("a1")
    .with_header("X-AAP-Autosave", "true");

    let outcome = controller.handle(request).await.unwrap();
    assert!(matches!(outcome, StepOutcome::NoContent));

    // The value landed as a string list, with no submission side effects.
    let saved = store
        .query(AnswerQuery::AssessmentVersionQuery {
            id: "a1".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(saved.answers["age"], json!(["17"]));
    assert!(store.history().await[0].autosave);
}

#[tokio::test]
async fn test_pipeline_folds_left_to_right() {
    let mut functions = FunctionRegistry::new();
    functions.register_transformer("append", |args| {
        let base = args.first().and_then(Value::as_str).unwrap_or("");
        let suffix = args.get(1).and_then(Value::as_str).unwrap_or("");
        Ok(json!(format!("{base}{suffix}")))
    });

    let definition = JourneyDefinition::new(json!({
        "code": "pipes",
        "path": "/q",
        "steps": [{
            "path": "/q/s",
            "blocks": [{
                "variant": "debug",
                "built": {
                    "type": "pipeline",
                    "input": "a",
                    "steps": [
                        {"type": "function.transformer", "name": "append", "arguments": ["b"]},
                        {"type": "function.transformer", "name": "append", "arguments": ["c"]}
                    ]
                },
                "untouched": {
                    "type": "pipeline",
                    "input": "unchanged",
                    "steps": []
                }
            }]
        }]
    }))
    .unwrap();

    let controller = StepController::new(definition, Arc::new(functions));
    let outcome = controller.handle(StepRequest::get("/q/s")).await.unwrap();
    let StepOutcome::Render(context) = outcome else {
        panic!("expected render");
    };
    assert_eq!(context.page["blocks"][0]["built"], json!("abc"));
    assert_eq!(context.page["blocks"][0]["untouched"], json!("unchanged"));
}

#[tokio::test]
async fn test_sync_invocation_of_a_pure_format_node() {
    let definition = json!({
        "code": "sync",
        "path": "/y",
        "steps": [{
            "path": "/y/s",
            "blocks": [{
                "variant": "heading",
                "text": {
                    "type": "format",
                    "template": "Step %1",
                    "arguments": [{"type": "reference", "path": ["query", "n"]}]
                }
            }]
        }]
    });
    let compiler = FormCompiler::new(Arc::new(FunctionRegistry::new()));
    let form = compiler.compile(&definition, "/y/s").unwrap();

    let format_id = form
        .nodes()
        .of_kind(NodeKind::Expression(ExpressionKind::Format))
        .first()
        .cloned()
        .unwrap();
    assert!(
        !form.handlers().is_async(&format_id),
        "query-fed format should be inferred sync"
    );

    let cx = form.evaluation(
        StepRequest::get("/y/s").with_query("n", json!("2")),
        formflow_store::AnswerSet::new(),
    );
    assert_eq!(cx.invoke_sync(&format_id).unwrap(), json!("Step 2"));
}

#[tokio::test]
async fn test_unknown_step_path_is_a_compile_error() {
    let controller = StepController::new(age_journey(), Arc::new(age_functions()));
    let err = controller
        .handle(StepRequest::get("/intake/nope"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        formflow_core::EngineError::Compile(formflow_core::CompileError::StepNotFound { .. })
    ));
}
