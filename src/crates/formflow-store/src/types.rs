//! Query and command types for the answer store contract
//!
//! The engine never persists answers itself. Every read goes through
//! [`AnswerQuery`](crate::AnswerQuery) and every write through
//! [`AnswerCommand`](crate::AnswerCommand); backends interpret them against
//! whatever storage they own. Both types are serde-serializable so they can
//! travel over process boundaries (queue, RPC) unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A saved answer set for one assessment version
///
/// Keys are field codes; values are whatever JSON shape the form wrote.
/// Multi-value fields (checkbox groups) store arrays of strings, single
/// fields store plain strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnswerSet {
    /// Field code -> saved value
    pub answers: HashMap<String, Value>,
}

impl AnswerSet {
    /// Empty answer set
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a saved answer by field code
    pub fn get(&self, code: &str) -> Option<&Value> {
        self.answers.get(code)
    }
}

/// Read-side requests understood by an [`AnswerStore`](crate::AnswerStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnswerQuery {
    /// Fetch the saved answers for one assessment version
    AssessmentVersionQuery {
        /// Assessment version id
        id: String,
    },
}

/// Write-side requests understood by an [`AnswerStore`](crate::AnswerStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnswerCommand {
    /// Merge `added` into the answer set and drop every key in `removed`
    UpdateAssessmentAnswersCommand {
        /// Assessment version id
        id: String,
        /// Field code -> new value
        added: HashMap<String, Value>,
        /// Field codes to delete
        removed: Vec<String>,
        /// True when the write came from the autosave pre-handler rather
        /// than a full submission
        autosave: bool,
        /// Acting user, when the session provides one
        user: Option<String>,
        /// When the command was issued
        timestamp: DateTime<Utc>,
    },
}

impl AnswerCommand {
    /// Build an update command stamped with the current time
    pub fn update(
        id: impl Into<String>,
        added: HashMap<String, Value>,
        removed: Vec<String>,
        autosave: bool,
        user: Option<String>,
    ) -> Self {
        Self::UpdateAssessmentAnswersCommand {
            id: id.into(),
            added,
            removed,
            autosave,
            user,
            timestamp: Utc::now(),
        }
    }
}
