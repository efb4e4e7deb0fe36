//! Journey definition loading
//!
//! Definitions are JSON-shaped; YAML is accepted as an authoring convenience
//! and deserialized into the same JSON value space. Loading performs the
//! structural pre-checks that do not need a step path - the full validation
//! happens during compilation.

use crate::error::{CompileError, CompileResult};
use serde_json::Value;
use std::path::Path;

/// A loaded, pre-checked journey definition
#[derive(Debug, Clone)]
pub struct JourneyDefinition {
    raw: Value,
}

impl JourneyDefinition {
    /// Wrap an in-memory definition value
    pub fn new(raw: Value) -> CompileResult<Self> {
        validate(&raw)?;
        Ok(Self { raw })
    }

    /// Parse a JSON string
    pub fn from_json_str(source: &str) -> CompileResult<Self> {
        Self::new(serde_json::from_str(source)?)
    }

    /// Parse a YAML string
    pub fn from_yaml_str(source: &str) -> CompileResult<Self> {
        Self::new(serde_yaml::from_str(source)?)
    }

    /// Load from a file, dispatching on the extension
    pub fn from_file(path: impl AsRef<Path>) -> CompileResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&source),
            _ => Self::from_json_str(&source),
        }
    }

    /// The raw definition value
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Journey code from the definition root
    pub fn code(&self) -> &str {
        journey_object(&self.raw)
            .and_then(|j| j.get("code"))
            .and_then(Value::as_str)
            .expect("validated at construction")
    }

    /// Declared step paths, in order
    pub fn step_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(journey) = journey_object(&self.raw) {
            collect_step_paths(journey, &mut out);
        }
        out
    }

    /// Consume into the raw value
    pub fn into_value(self) -> Value {
        self.raw
    }
}

fn journey_object(raw: &Value) -> Option<&Value> {
    let unwrapped = raw.get("journey").filter(|v| v.is_object()).unwrap_or(raw);
    unwrapped.is_object().then_some(unwrapped)
}

fn collect_step_paths(journey: &Value, out: &mut Vec<String>) {
    if let Some(steps) = journey.get("steps").and_then(Value::as_array) {
        for step in steps {
            if let Some(path) = step.get("path").and_then(Value::as_str) {
                out.push(path.to_string());
            }
        }
    }
    if let Some(children) = journey.get("children").and_then(Value::as_array) {
        for child in children {
            collect_step_paths(child, out);
        }
    }
}

fn validate(raw: &Value) -> CompileResult<()> {
    let journey = journey_object(raw).ok_or_else(|| CompileError::InvalidDefinition {
        path: "journey".to_string(),
        message: "definition root must be an object".to_string(),
    })?;

    for key in ["code", "path"] {
        if journey.get(key).and_then(Value::as_str).is_none() {
            return Err(CompileError::InvalidDefinition {
                path: "journey".to_string(),
                message: format!("journey requires a string '{key}'"),
            });
        }
    }
    let steps = journey
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| CompileError::InvalidDefinition {
            path: "journey".to_string(),
            message: "journey requires a 'steps' array".to_string(),
        })?;
    for (i, step) in steps.iter().enumerate() {
        if step.get("path").and_then(Value::as_str).is_none() {
            return Err(CompileError::InvalidDefinition {
                path: format!("journey.steps[{i}]"),
                message: "step requires a string 'path'".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_and_yaml_load_identically() {
        let from_json = JourneyDefinition::from_json_str(
            r#"{"code": "j", "path": "/j", "steps": [{"path": "/j/a", "blocks": []}]}"#,
        )
        .unwrap();

        let from_yaml = JourneyDefinition::from_yaml_str(
            "code: j\npath: /j\nsteps:\n  - path: /j/a\n    blocks: []\n",
        )
        .unwrap();

        assert_eq!(from_json.raw(), from_yaml.raw());
        assert_eq!(from_json.code(), "j");
    }

    #[test]
    fn test_wrapper_key_is_accepted() {
        let definition = JourneyDefinition::new(json!({
            "journey": {"code": "j", "path": "/j", "steps": []}
        }))
        .unwrap();
        assert_eq!(definition.code(), "j");
    }

    #[test]
    fn test_missing_code_is_rejected() {
        let err = JourneyDefinition::new(json!({"path": "/j", "steps": []})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_step_without_path_is_rejected() {
        let err = JourneyDefinition::new(json!({
            "code": "j", "path": "/j", "steps": [{"blocks": []}]
        }))
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_step_paths_cover_nested_journeys() {
        let definition = JourneyDefinition::new(json!({
            "code": "j",
            "path": "/j",
            "steps": [{"path": "/j/a"}],
            "children": [{
                "code": "sub", "path": "/j/sub", "steps": [{"path": "/j/sub/b"}]
            }]
        }))
        .unwrap();
        assert_eq!(definition.step_paths(), vec!["/j/a", "/j/sub/b"]);
    }
}
