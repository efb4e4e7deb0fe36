//! Value conventions shared by the handlers

use crate::ast::PropertyValue;
use crate::error::ThunkResult;
use crate::eval::EvalContext;
use serde_json::Value;

/// Truthiness of an evaluated value
///
/// `null`, `false`, numeric zero and the empty string are falsy; everything
/// else - including empty arrays and objects - is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of an evaluated value
///
/// `null` renders empty, strings render as-is, scalars via their display
/// form, compounds as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        compound => serde_json::to_string(compound).unwrap_or_default(),
    }
}

/// Escape the five HTML-significant characters
///
/// Applied to format *arguments* only; templates are trusted author content.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Evaluate a property value: literals pass through, node references invoke
/// their handler, lists evaluate element-wise into an array.
pub async fn eval_property(cx: &EvalContext, value: &PropertyValue) -> ThunkResult {
    match value {
        PropertyValue::Literal(v) => Ok(v.clone()),
        PropertyValue::Node(id) => cx.invoke(id).await,
        PropertyValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(Box::pin(eval_property(cx, item)).await?);
            }
            Ok(Value::Array(out))
        }
    }
}

/// Synchronous twin of [`eval_property`]
pub fn eval_property_sync(cx: &EvalContext, value: &PropertyValue) -> ThunkResult {
    match value {
        PropertyValue::Literal(v) => Ok(v.clone()),
        PropertyValue::Node(id) => cx.invoke_sync(id),
        PropertyValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_property_sync(cx, item)?);
            }
            Ok(Value::Array(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness_follows_the_definition_language() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&Value::Null), "");
        assert_eq!(stringify(&json!("abc")), "abc");
        assert_eq!(stringify(&json!(42)), "42");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!(["a", 1])), "[\"a\",1]");
    }

    #[test]
    fn test_escape_html_covers_all_five() {
        assert_eq!(
            escape_html(r#"<a href="x" title='y'>&z</a>"#),
            "&lt;a href=&quot;x&quot; title=&#39;y&#39;&gt;&amp;z&lt;/a&gt;"
        );
        // No-op on clean text
        assert_eq!(escape_html("Drugs and alcohol"), "Drugs and alcohol");
    }
}
