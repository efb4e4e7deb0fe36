//! JSON definition to AST transformation
//!
//! Recursive descent over the raw journey JSON. Structural nodes (journeys,
//! steps, blocks) are recognized positionally - a journey owns `steps`, a step
//! owns `blocks`, a block carries `variant`. Everything embedded in a property
//! is either a plain literal (passed through untouched) or a tagged expression
//! object whose `type` field selects the factory:
//!
//! ```text
//! {"type": "reference", "path": ["answers", "@self"]}
//! {"type": "predicate.test", "subject": ..., "condition": ..., "negate": false}
//! {"type": "transition.submit", "validate": true, "onValid": {...}, ...}
//! ```
//!
//! Factories own id allocation (exactly one id per node) and never mutate the
//! input JSON. Reference path segments that are themselves expressions are
//! transformed recursively, which is what enables dynamic keys like
//! `data[dynamicKey]`. Collection `template` subtrees are deliberately kept
//! raw - they are instantiated per item at evaluation time, in the
//! `runtime_ast` id space.
//!
//! Unknown tags fail the compilation with the JSON path of the offending
//! object.

use crate::ast::{
    AstBuffer, AstNode, FunctionKind, IdGenerator, IdSpace, IterateKind, NodeId, NodeKind,
    PredicateKind, PropertyValue, StructureKind, TransitionKind,
};
use crate::ast::ExpressionKind;
use crate::error::{CompileError, CompileResult};
use serde_json::{Map, Value};

/// Block property keys with dedicated handling; everything else on a block is
/// treated as an arbitrary component prop.
const BLOCK_RESERVED: &[&str] = &[
    "variant",
    "code",
    "formatters",
    "defaultValue",
    "validate",
    "dependent",
    "blocks",
];

/// Transform a raw journey definition into a flat AST buffer.
///
/// Accepts either a bare journey object or a `{"journey": {...}}` wrapper.
/// The same generator used here must be handed to the normalizers so cloned
/// subtrees keep allocating from the `compile_ast` counter.
pub fn transform(definition: &Value, ids: &mut IdGenerator) -> CompileResult<AstBuffer> {
    let journey = definition
        .get("journey")
        .filter(|v| v.is_object())
        .unwrap_or(definition);

    let mut transformer = Transformer {
        ids,
        nodes: Vec::new(),
        space: IdSpace::CompileAst,
    };
    let root = transformer.journey(journey, "journey")?;

    let mut buffer = AstBuffer::new(root);
    for node in transformer.nodes {
        buffer.insert(node);
    }
    Ok(buffer)
}

/// Transform a raw subtree in the runtime id space.
///
/// Used by collection handlers to instantiate their template per item. The
/// root of a runtime subtree is a block (or expression), never a journey.
pub fn transform_runtime_template(
    template: &Value,
    ids: &mut IdGenerator,
) -> CompileResult<AstBuffer> {
    let mut transformer = Transformer {
        ids,
        nodes: Vec::new(),
        space: IdSpace::RuntimeAst,
    };
    let root = if template.get("variant").is_some() {
        transformer.block(template, "template")?
    } else {
        match transformer.value(template, "template")? {
            PropertyValue::Node(id) => id,
            _ => {
                return Err(CompileError::InvalidDefinition {
                    path: "template".to_string(),
                    message: "collection template must be a block or expression object"
                        .to_string(),
                })
            }
        }
    };

    let mut buffer = AstBuffer::new(root);
    for node in transformer.nodes {
        buffer.insert(node);
    }
    Ok(buffer)
}

struct Transformer<'a> {
    ids: &'a mut IdGenerator,
    nodes: Vec<AstNode>,
    space: IdSpace,
}

impl<'a> Transformer<'a> {
    fn allocate(&mut self) -> NodeId {
        self.ids.next(self.space)
    }

    fn push(&mut self, node: AstNode) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    fn journey(&mut self, raw: &Value, path: &str) -> CompileResult<NodeId> {
        let obj = expect_object(raw, path)?;
        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Structure(StructureKind::Journey), raw.clone());

        node.properties.insert(
            "code".to_string(),
            PropertyValue::Literal(require_string(obj, "code", path)?),
        );
        node.properties.insert(
            "path".to_string(),
            PropertyValue::Literal(require_string(obj, "path", path)?),
        );
        if let Some(title) = obj.get("title") {
            let value = self.value(title, &format!("{path}.title"))?;
            node.properties.insert("title".to_string(), value);
        }

        let steps = self.child_list(obj, "steps", path, |t, v, p| t.step(v, p))?;
        node.properties.insert("steps".to_string(), steps);

        if obj.contains_key("children") {
            let children = self.child_list(obj, "children", path, |t, v, p| t.journey(v, p))?;
            node.properties.insert("children".to_string(), children);
        }
        self.transition_lists(obj, path, &mut node, &["onLoad", "onAccess"])?;

        Ok(self.push(node))
    }

    fn step(&mut self, raw: &Value, path: &str) -> CompileResult<NodeId> {
        let obj = expect_object(raw, path)?;
        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Structure(StructureKind::Step), raw.clone());

        node.properties.insert(
            "path".to_string(),
            PropertyValue::Literal(require_string(obj, "path", path)?),
        );
        if let Some(title) = obj.get("title") {
            let value = self.value(title, &format!("{path}.title"))?;
            node.properties.insert("title".to_string(), value);
        }

        let blocks = self.child_list(obj, "blocks", path, |t, v, p| t.block(v, p))?;
        node.properties.insert("blocks".to_string(), blocks);

        self.transition_lists(
            obj,
            path,
            &mut node,
            &["onLoad", "onAccess", "onAction", "onSubmission"],
        )?;

        Ok(self.push(node))
    }

    fn block(&mut self, raw: &Value, path: &str) -> CompileResult<NodeId> {
        let obj = expect_object(raw, path)?;
        let kind = if obj.contains_key("code") {
            StructureKind::Field
        } else {
            StructureKind::Block
        };
        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Structure(kind), raw.clone());

        node.properties.insert(
            "variant".to_string(),
            PropertyValue::Literal(require_string(obj, "variant", path)?),
        );

        if let Some(code) = obj.get("code") {
            let value = self.value(code, &format!("{path}.code"))?;
            node.properties.insert("code".to_string(), value);
        }
        if obj.contains_key("formatters") {
            let formatters = self.child_list(obj, "formatters", path, |t, v, p| {
                t.expect_expression(v, p, |k| {
                    matches!(k, NodeKind::Expression(ExpressionKind::Function(_)))
                })
            })?;
            node.properties.insert("formatters".to_string(), formatters);
        }
        if let Some(default) = obj.get("defaultValue") {
            let value = self.value(default, &format!("{path}.defaultValue"))?;
            node.properties.insert("defaultValue".to_string(), value);
        }
        if obj.contains_key("validate") {
            let validations = self.child_list(obj, "validate", path, |t, v, p| {
                t.expect_expression(v, p, |k| {
                    matches!(k, NodeKind::Expression(ExpressionKind::Validation))
                })
            })?;
            node.properties.insert("validate".to_string(), validations);
        }
        if let Some(dependent) = obj.get("dependent") {
            let value = self.value(dependent, &format!("{path}.dependent"))?;
            node.properties.insert("dependent".to_string(), value);
        }
        if obj.contains_key("blocks") {
            let children = self.child_list(obj, "blocks", path, |t, v, p| t.block(v, p))?;
            node.properties.insert("blocks".to_string(), children);
        }

        for (key, value) in obj {
            if BLOCK_RESERVED.contains(&key.as_str()) {
                continue;
            }
            let transformed = self.value(value, &format!("{path}.{key}"))?;
            node.properties.insert(key.clone(), transformed);
        }

        Ok(self.push(node))
    }

    /// Literal pass-through, array recursion, or tagged-expression dispatch.
    fn value(&mut self, raw: &Value, path: &str) -> CompileResult<PropertyValue> {
        match raw {
            Value::Object(obj) if obj.get("type").and_then(Value::as_str).is_some() => {
                Ok(PropertyValue::Node(self.expression(raw, path)?))
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.value(item, &format!("{path}[{i}]"))?);
                }
                Ok(PropertyValue::List(out))
            }
            other => Ok(PropertyValue::Literal(other.clone())),
        }
    }

    fn expression(&mut self, raw: &Value, path: &str) -> CompileResult<NodeId> {
        let obj = expect_object(raw, path)?;
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "expression object has no 'type'".to_string(),
            })?
            .to_string();

        match tag.as_str() {
            "reference" => self.reference(obj, raw, path),
            "format" => self.format(obj, raw, path),
            "pipeline" => self.pipeline(obj, raw, path),
            "conditional" => self.conditional(obj, raw, path),
            "collection" => self.collection(obj, raw, path),
            "validation" => self.validation(obj, raw, path),
            "next" => self.next(obj, raw, path),
            "throw-error" => self.throw_error(obj, raw, path),
            "iterator.filter" => self.iterate(obj, raw, path, IterateKind::Filter),
            "iterator.map" => self.iterate(obj, raw, path, IterateKind::Map),
            "iterator.find" => self.iterate(obj, raw, path, IterateKind::Find),
            "predicate.test" => self.predicate_test(obj, raw, path),
            "predicate.and" => self.predicate_combinator(obj, raw, path, PredicateKind::And),
            "predicate.or" => self.predicate_combinator(obj, raw, path, PredicateKind::Or),
            "predicate.xor" => self.predicate_combinator(obj, raw, path, PredicateKind::Xor),
            "predicate.not" => self.predicate_not(obj, raw, path),
            "function.condition" => self.function(obj, raw, path, FunctionKind::Condition),
            "function.transformer" => self.function(obj, raw, path, FunctionKind::Transformer),
            "function.generator" => self.function(obj, raw, path, FunctionKind::Generator),
            "function.effect" => self.function(obj, raw, path, FunctionKind::Effect),
            "transition.load" => self.transition(obj, raw, path, TransitionKind::Load),
            "transition.access" => self.transition(obj, raw, path, TransitionKind::Access),
            "transition.action" => self.transition(obj, raw, path, TransitionKind::Action),
            "transition.submit" => self.transition(obj, raw, path, TransitionKind::Submit),
            _ => Err(CompileError::UnknownNodeType {
                path: path.to_string(),
                tag,
            }),
        }
    }

    fn reference(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let segments = obj
            .get("path")
            .and_then(Value::as_array)
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "reference requires a 'path' array".to_string(),
            })?;
        if segments.is_empty() {
            return Err(CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "reference path must not be empty".to_string(),
            });
        }

        let mut out = Vec::with_capacity(segments.len());
        for (i, segment) in segments.iter().enumerate() {
            out.push(self.value(segment, &format!("{path}.path[{i}]"))?);
        }

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Reference),
            raw.clone(),
        );
        node.properties
            .insert("path".to_string(), PropertyValue::List(out));
        Ok(self.push(node))
    }

    fn format(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Format),
            raw.clone(),
        );
        node.properties.insert(
            "template".to_string(),
            PropertyValue::Literal(require_string(obj, "template", path)?),
        );
        if let Some(arguments) = obj.get("arguments") {
            let value = self.value(arguments, &format!("{path}.arguments"))?;
            node.properties.insert("arguments".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn pipeline(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Pipeline),
            raw.clone(),
        );
        if let Some(input) = obj.get("input") {
            let value = self.value(input, &format!("{path}.input"))?;
            node.properties.insert("input".to_string(), value);
        }
        let steps = self.child_list(obj, "steps", path, |t, v, p| {
            t.expect_expression(v, p, |k| {
                matches!(k, NodeKind::Expression(ExpressionKind::Function(_)))
            })
        })?;
        node.properties.insert("steps".to_string(), steps);
        Ok(self.push(node))
    }

    fn conditional(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let predicate = obj
            .get("predicate")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "conditional requires a 'predicate'".to_string(),
            })?;
        let predicate = self.expression(predicate, &format!("{path}.predicate"))?;

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Conditional),
            raw.clone(),
        );
        node.properties
            .insert("predicate".to_string(), PropertyValue::Node(predicate));
        if let Some(then_value) = obj.get("thenValue") {
            let value = self.value(then_value, &format!("{path}.thenValue"))?;
            node.properties.insert("thenValue".to_string(), value);
        }
        if let Some(else_value) = obj.get("elseValue") {
            let value = self.value(else_value, &format!("{path}.elseValue"))?;
            node.properties.insert("elseValue".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn iterate(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
        kind: IterateKind,
    ) -> CompileResult<NodeId> {
        let source = obj
            .get("source")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "iterator requires a 'source'".to_string(),
            })?;
        let source = self.value(source, &format!("{path}.source"))?;

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Iterate(kind)),
            raw.clone(),
        );
        node.properties.insert("source".to_string(), source);
        if let Some(predicate) = obj.get("predicate") {
            let p = self.expression(predicate, &format!("{path}.predicate"))?;
            node.properties
                .insert("predicate".to_string(), PropertyValue::Node(p));
        }
        if let Some(transform) = obj.get("transform") {
            let t = self.expression(transform, &format!("{path}.transform"))?;
            node.properties
                .insert("transform".to_string(), PropertyValue::Node(t));
        }
        if let Some(fallback) = obj.get("fallback") {
            let value = self.value(fallback, &format!("{path}.fallback"))?;
            node.properties.insert("fallback".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn collection(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let source = obj
            .get("source")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "collection requires a 'source'".to_string(),
            })?;
        let source = self.value(source, &format!("{path}.source"))?;
        let template = obj
            .get("template")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "collection requires a 'template'".to_string(),
            })?;

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Collection),
            raw.clone(),
        );
        node.properties.insert("source".to_string(), source);
        // The template stays raw: it is transformed per item at evaluation
        // time, in the runtime_ast id space.
        node.properties.insert(
            "template".to_string(),
            PropertyValue::Literal(template.clone()),
        );
        Ok(self.push(node))
    }

    fn predicate_test(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let subject = obj
            .get("subject")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "predicate.test requires a 'subject'".to_string(),
            })?;
        let subject = self.value(subject, &format!("{path}.subject"))?;

        let condition = match obj.get("condition") {
            Some(Value::String(name)) => PropertyValue::Literal(Value::String(name.clone())),
            Some(tagged @ Value::Object(_)) => PropertyValue::Node(self.expect_expression(
                tagged,
                &format!("{path}.condition"),
                |k| {
                    matches!(
                        k,
                        NodeKind::Expression(ExpressionKind::Function(FunctionKind::Condition))
                    )
                },
            )?),
            _ => {
                return Err(CompileError::InvalidDefinition {
                    path: path.to_string(),
                    message: "predicate.test requires a 'condition' name or function.condition"
                        .to_string(),
                })
            }
        };

        // Negation lives here and only here; the parser refuses inlined
        // negation elsewhere.
        let negate = obj.get("negate").and_then(Value::as_bool).unwrap_or(false);

        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Predicate(PredicateKind::Test), raw.clone());
        node.properties.insert("subject".to_string(), subject);
        node.properties.insert("condition".to_string(), condition);
        node.properties.insert(
            "negate".to_string(),
            PropertyValue::Literal(Value::Bool(negate)),
        );
        Ok(self.push(node))
    }

    fn predicate_combinator(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
        kind: PredicateKind,
    ) -> CompileResult<NodeId> {
        let operands = self.child_list(obj, "operands", path, |t, v, p| t.expression(v, p))?;
        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Predicate(kind), raw.clone());
        node.properties.insert("operands".to_string(), operands);
        Ok(self.push(node))
    }

    fn predicate_not(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let operand = obj
            .get("operand")
            .or_else(|| {
                obj.get("operands")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first())
            })
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "predicate.not requires an 'operand'".to_string(),
            })?;
        let operand = self.expression(operand, &format!("{path}.operand"))?;

        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Predicate(PredicateKind::Not), raw.clone());
        node.properties
            .insert("operand".to_string(), PropertyValue::Node(operand));
        Ok(self.push(node))
    }

    fn function(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
        kind: FunctionKind,
    ) -> CompileResult<NodeId> {
        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Function(kind)),
            raw.clone(),
        );
        node.properties.insert(
            "name".to_string(),
            PropertyValue::Literal(require_string(obj, "name", path)?),
        );
        if let Some(arguments) = obj.get("arguments") {
            let value = self.value(arguments, &format!("{path}.arguments"))?;
            node.properties.insert("arguments".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn validation(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let when = obj
            .get("when")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "validation requires a 'when' predicate".to_string(),
            })?;
        let when = self.expression(when, &format!("{path}.when"))?;

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::Validation),
            raw.clone(),
        );
        node.properties
            .insert("when".to_string(), PropertyValue::Node(when));
        if let Some(message) = obj.get("message") {
            let value = self.value(message, &format!("{path}.message"))?;
            node.properties.insert("message".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn next(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let goto = obj
            .get("goto")
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "next requires a 'goto'".to_string(),
            })?;
        let goto = self.value(goto, &format!("{path}.goto"))?;

        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Expression(ExpressionKind::Next), raw.clone());
        node.properties.insert("goto".to_string(), goto);
        if let Some(when) = obj.get("when") {
            let when = self.expression(when, &format!("{path}.when"))?;
            node.properties
                .insert("when".to_string(), PropertyValue::Node(when));
        }
        Ok(self.push(node))
    }

    fn throw_error(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
    ) -> CompileResult<NodeId> {
        let status = obj
            .get("status")
            .and_then(Value::as_u64)
            .ok_or_else(|| CompileError::InvalidDefinition {
                path: path.to_string(),
                message: "throw-error requires a numeric 'status'".to_string(),
            })?;

        let id = self.allocate();
        let mut node = AstNode::new(
            id,
            NodeKind::Expression(ExpressionKind::ThrowError),
            raw.clone(),
        );
        node.properties.insert(
            "status".to_string(),
            PropertyValue::Literal(Value::from(status)),
        );
        if let Some(when) = obj.get("when") {
            let when = self.expression(when, &format!("{path}.when"))?;
            node.properties
                .insert("when".to_string(), PropertyValue::Node(when));
        }
        if let Some(message) = obj.get("message") {
            let value = self.value(message, &format!("{path}.message"))?;
            node.properties.insert("message".to_string(), value);
        }
        Ok(self.push(node))
    }

    fn transition(
        &mut self,
        obj: &Map<String, Value>,
        raw: &Value,
        path: &str,
        kind: TransitionKind,
    ) -> CompileResult<NodeId> {
        let id = self.allocate();
        let mut node = AstNode::new(id, NodeKind::Transition(kind), raw.clone());

        if let Some(when) = obj.get("when") {
            let when = self.expression(when, &format!("{path}.when"))?;
            node.properties
                .insert("when".to_string(), PropertyValue::Node(when));
        }
        if obj.contains_key("effects") {
            let effects = self.child_list(obj, "effects", path, |t, v, p| {
                t.expect_expression(v, p, |k| {
                    matches!(
                        k,
                        NodeKind::Expression(ExpressionKind::Function(FunctionKind::Effect))
                    )
                })
            })?;
            node.properties.insert("effects".to_string(), effects);
        }

        match kind {
            TransitionKind::Access => {
                if let Some(redirect) = obj.get("redirect") {
                    let value = self.value(redirect, &format!("{path}.redirect"))?;
                    node.properties.insert("redirect".to_string(), value);
                }
                if let Some(status) = obj.get("status").and_then(Value::as_u64) {
                    node.properties.insert(
                        "status".to_string(),
                        PropertyValue::Literal(Value::from(status)),
                    );
                }
                if let Some(message) = obj.get("message") {
                    let value = self.value(message, &format!("{path}.message"))?;
                    node.properties.insert("message".to_string(), value);
                }
            }
            TransitionKind::Submit => {
                if obj.contains_key("guards") {
                    let guards =
                        self.child_list(obj, "guards", path, |t, v, p| t.expression(v, p))?;
                    node.properties.insert("guards".to_string(), guards);
                }
                let validate = obj
                    .get("validate")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                node.properties.insert(
                    "validate".to_string(),
                    PropertyValue::Literal(Value::Bool(validate)),
                );
                for branch in ["onAlways", "onValid", "onInvalid"] {
                    self.submit_branch(obj, branch, path, &mut node)?;
                }
            }
            TransitionKind::Load | TransitionKind::Action => {}
        }

        Ok(self.push(node))
    }

    /// Flatten one submit branch into `<branch>Effects` / `<branch>Next`
    /// properties.
    fn submit_branch(
        &mut self,
        obj: &Map<String, Value>,
        branch: &str,
        path: &str,
        node: &mut AstNode,
    ) -> CompileResult<()> {
        let Some(raw_branch) = obj.get(branch) else {
            return Ok(());
        };
        let branch_obj = expect_object(raw_branch, &format!("{path}.{branch}"))?;

        if branch_obj.contains_key("effects") {
            let effects = self.child_list(branch_obj, "effects", &format!("{path}.{branch}"), |t, v, p| {
                t.expect_expression(v, p, |k| {
                    matches!(
                        k,
                        NodeKind::Expression(ExpressionKind::Function(FunctionKind::Effect))
                    )
                })
            })?;
            node.properties.insert(format!("{branch}Effects"), effects);
        }
        if branch_obj.contains_key("next") {
            let next = self.child_list(branch_obj, "next", &format!("{path}.{branch}"), |t, v, p| {
                t.expect_expression(v, p, |k| {
                    matches!(
                        k,
                        NodeKind::Expression(ExpressionKind::Next)
                            | NodeKind::Expression(ExpressionKind::ThrowError)
                    )
                })
            })?;
            node.properties.insert(format!("{branch}Next"), next);
        }
        Ok(())
    }

    fn transition_lists(
        &mut self,
        obj: &Map<String, Value>,
        path: &str,
        node: &mut AstNode,
        keys: &[&str],
    ) -> CompileResult<()> {
        for key in keys {
            if !obj.contains_key(*key) {
                continue;
            }
            let expected: fn(&NodeKind) -> bool = match *key {
                "onLoad" => |k| matches!(k, NodeKind::Transition(TransitionKind::Load)),
                "onAccess" => |k| matches!(k, NodeKind::Transition(TransitionKind::Access)),
                "onAction" => |k| matches!(k, NodeKind::Transition(TransitionKind::Action)),
                _ => |k| matches!(k, NodeKind::Transition(TransitionKind::Submit)),
            };
            let list = self.child_list(obj, key, path, |t, v, p| t.expect_expression(v, p, expected))?;
            node.properties.insert(key.to_string(), list);
        }
        Ok(())
    }

    /// Transform an expression and check its kind matches expectations.
    fn expect_expression(
        &mut self,
        raw: &Value,
        path: &str,
        accept: impl Fn(&NodeKind) -> bool,
    ) -> CompileResult<NodeId> {
        let id = self.expression(raw, path)?;
        let kind = self
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.kind)
            .expect("freshly transformed node is present");
        if accept(&kind) {
            Ok(id)
        } else {
            Err(CompileError::InvalidDefinition {
                path: path.to_string(),
                message: format!("unexpected node kind {} here", kind.label()),
            })
        }
    }

    fn child_list(
        &mut self,
        obj: &Map<String, Value>,
        key: &str,
        path: &str,
        mut each: impl FnMut(&mut Self, &Value, &str) -> CompileResult<NodeId>,
    ) -> CompileResult<PropertyValue> {
        let items = match obj.get(key) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(CompileError::InvalidDefinition {
                    path: format!("{path}.{key}"),
                    message: "expected an array".to_string(),
                })
            }
            None => return Ok(PropertyValue::List(Vec::new())),
        };
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let child = each(self, item, &format!("{path}.{key}[{i}]"))?;
            out.push(PropertyValue::Node(child));
        }
        Ok(PropertyValue::List(out))
    }
}

fn expect_object<'v>(raw: &'v Value, path: &str) -> CompileResult<&'v Map<String, Value>> {
    raw.as_object().ok_or_else(|| CompileError::InvalidDefinition {
        path: path.to_string(),
        message: "expected an object".to_string(),
    })
}

fn require_string(obj: &Map<String, Value>, key: &str, path: &str) -> CompileResult<Value> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(Value::String(s.clone())),
        _ => Err(CompileError::InvalidDefinition {
            path: path.to_string(),
            message: format!("requires a string '{key}'"),
        }),
    }
}
