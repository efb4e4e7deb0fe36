//! Evaluated render tree
//!
//! A GET (or an invalid submission) ends with a [`RenderContext`]: the step's
//! evaluated block tree plus any triggered validation records. The external
//! framework adapter owns everything after that - component lookup, HTML
//! assembly, page layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One triggered validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    /// Field the message attaches to
    #[serde(rename = "fieldId")]
    pub field_id: String,
    /// Evaluated message
    pub message: String,
}

/// Evaluated page for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    /// Journey code the step belongs to
    pub journey: String,
    /// Step path
    pub step: String,
    /// Evaluated step tree (`{"path", "title", "blocks": [...]}`)
    pub page: Value,
    /// Triggered validations, in evaluation order
    pub validations: Vec<ValidationRecord>,
}

impl RenderContext {
    /// True when at least one validation fired
    pub fn has_validation_errors(&self) -> bool {
        !self.validations.is_empty()
    }

    /// Validation messages for one field
    pub fn messages_for(&self, field_id: &str) -> Vec<&str> {
        self.validations
            .iter()
            .filter(|v| v.field_id == field_id)
            .map(|v| v.message.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_for_filters_by_field() {
        let context = RenderContext {
            journey: "j".to_string(),
            step: "/j/s".to_string(),
            page: json!({}),
            validations: vec![
                ValidationRecord {
                    field_id: "age".to_string(),
                    message: "Enter an age".to_string(),
                },
                ValidationRecord {
                    field_id: "name".to_string(),
                    message: "Enter a name".to_string(),
                },
            ],
        };
        assert!(context.has_validation_errors());
        assert_eq!(context.messages_for("age"), vec!["Enter an age"]);
        assert!(context.messages_for("email").is_empty());
    }
}
