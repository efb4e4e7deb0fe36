//! Compilation throughput benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use formflow_core::{FormCompiler, FunctionRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

fn representative_journey() -> Value {
    let steps: Vec<Value> = (0..10)
        .map(|i| {
            json!({
                "path": format!("/bench/step-{i}"),
                "blocks": [
                    {
                        "variant": "text-input",
                        "code": format!("field{i}"),
                        "label": {
                            "type": "format",
                            "template": "Field %1",
                            "arguments": [i.to_string()]
                        },
                        "validate": [{
                            "type": "validation",
                            "when": {
                                "type": "predicate.test",
                                "subject": {"type": "reference", "path": ["answers", "@self"]},
                                "condition": "isEmpty"
                            },
                            "message": "Required"
                        }]
                    },
                    {
                        "variant": "hint",
                        "text": {"type": "reference", "path": ["data", "guidance"]}
                    }
                ],
                "onSubmission": [{
                    "type": "transition.submit",
                    "validate": true,
                    "onValid": {"next": [{"type": "next", "goto": format!("/bench/step-{}", i + 1)}]},
                    "onInvalid": {"next": [{"type": "next", "goto": format!("/bench/step-{i}")}]}
                }]
            })
        })
        .collect();

    json!({
        "code": "bench",
        "path": "/bench",
        "onLoad": [{
            "type": "transition.load",
            "effects": [{"type": "function.effect", "name": "loadGuidance"}]
        }],
        "steps": steps
    })
}

fn bench_compile(c: &mut Criterion) {
    let mut functions = FunctionRegistry::new();
    functions.register_condition("isEmpty", |args| {
        args.first()
            .map(|v| v.is_null() || v.as_str().map(str::is_empty).unwrap_or(false))
            .unwrap_or(true)
    });
    functions.register_effect("loadGuidance", |context, _| {
        Box::pin(async move {
            context.put_data("guidance", serde_json::json!("Fill this in"));
            Ok(serde_json::Value::Null)
        })
    });

    let compiler = FormCompiler::new(Arc::new(functions));
    let definition = representative_journey();

    c.bench_function("compile_ten_step_journey", |b| {
        b.iter(|| {
            let form = compiler
                .compile(black_box(&definition), "/bench/step-0")
                .unwrap();
            black_box(form);
        })
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
