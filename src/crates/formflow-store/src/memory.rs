//! In-memory answer storage for development and testing
//!
//! **[`InMemoryAnswerStore`]** is the reference implementation of the
//! [`AnswerStore`] trait. It keeps every answer set in a process-local map
//! behind a `tokio::sync::RwLock` and records each applied command in an audit
//! trail so tests can assert on write behavior.
//!
//! **Use it for:**
//! - unit and integration tests
//! - demos and local development
//!
//! **Do not use it** where answers must survive a restart or be shared across
//! processes - implement [`AnswerStore`] against real storage instead.
//!
//! # Examples
//!
//! ```rust,ignore
//! use formflow_store::{InMemoryAnswerStore, AnswerStore, AnswerQuery, AnswerCommand};
//! use std::collections::HashMap;
//! use serde_json::json;
//!
//! let store = InMemoryAnswerStore::new();
//!
//! store.command(AnswerCommand::update(
//!     "assessment-1",
//!     HashMap::from([("firstName".to_string(), json!("Ada"))]),
//!     vec![],
//!     false,
//!     None,
//! )).await?;
//!
//! let set = store.query(AnswerQuery::AssessmentVersionQuery {
//!     id: "assessment-1".to_string(),
//! }).await?;
//! assert_eq!(set.answers["firstName"], json!("Ada"));
//! ```

use crate::error::Result;
use crate::traits::AnswerStore;
use crate::types::{AnswerCommand, AnswerQuery, AnswerSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One applied command, kept for test assertions
#[derive(Debug, Clone)]
pub struct AppliedCommand {
    /// Unique id assigned when the command was applied
    pub id: Uuid,
    /// When the command was applied
    pub applied_at: DateTime<Utc>,
    /// Whether the write came from the autosave path
    pub autosave: bool,
    /// Acting user, if any
    pub user: Option<String>,
}

/// Thread-safe, ephemeral [`AnswerStore`] implementation
#[derive(Debug, Clone, Default)]
pub struct InMemoryAnswerStore {
    sets: Arc<RwLock<HashMap<String, AnswerSet>>>,
    history: Arc<RwLock<Vec<AppliedCommand>>>,
}

impl InMemoryAnswerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an answer set (test helper)
    pub async fn seed(&self, id: impl Into<String>, answers: HashMap<String, serde_json::Value>) {
        self.sets
            .write()
            .await
            .insert(id.into(), AnswerSet { answers });
    }

    /// Applied commands, oldest first
    pub async fn history(&self) -> Vec<AppliedCommand> {
        self.history.read().await.clone()
    }

    /// Drop every answer set and the audit trail (test isolation)
    pub async fn clear(&self) {
        self.sets.write().await.clear();
        self.history.write().await.clear();
    }
}

#[async_trait]
impl AnswerStore for InMemoryAnswerStore {
    async fn query(&self, query: AnswerQuery) -> Result<AnswerSet> {
        let AnswerQuery::AssessmentVersionQuery { id } = query;
        // Missing sets read as empty rather than NotFound: a fresh assessment
        // has no saved answers yet and the engine treats that as normal.
        Ok(self.sets.read().await.get(&id).cloned().unwrap_or_default())
    }

    async fn command(&self, command: AnswerCommand) -> Result<()> {
        let AnswerCommand::UpdateAssessmentAnswersCommand {
            id,
            added,
            removed,
            autosave,
            user,
            ..
        } = command;

        let mut sets = self.sets.write().await;
        let set = sets.entry(id).or_default();
        for (code, value) in added {
            set.answers.insert(code, value);
        }
        for code in &removed {
            set.answers.remove(code);
        }
        drop(sets);

        self.history.write().await.push(AppliedCommand {
            id: Uuid::new_v4(),
            applied_at: Utc::now(),
            autosave,
            user,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_unknown_id_is_empty() {
        let store = InMemoryAnswerStore::new();
        let set = store
            .query(AnswerQuery::AssessmentVersionQuery {
                id: "missing".to_string(),
            })
            .await
            .unwrap();
        assert!(set.answers.is_empty());
    }

    #[tokio::test]
    async fn test_command_merges_and_removes() {
        let store = InMemoryAnswerStore::new();
        store
            .seed(
                "a1",
                HashMap::from([
                    ("keep".to_string(), json!("yes")),
                    ("stale".to_string(), json!("old")),
                ]),
            )
            .await;

        store
            .command(AnswerCommand::update(
                "a1",
                HashMap::from([("added".to_string(), json!(["x", "y"]))]),
                vec!["stale".to_string()],
                false,
                Some("tester".to_string()),
            ))
            .await
            .unwrap();

        let set = store
            .query(AnswerQuery::AssessmentVersionQuery {
                id: "a1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(set.answers["keep"], json!("yes"));
        assert_eq!(set.answers["added"], json!(["x", "y"]));
        assert!(!set.answers.contains_key("stale"));
    }

    #[tokio::test]
    async fn test_history_records_autosave_flag() {
        let store = InMemoryAnswerStore::new();
        store
            .command(AnswerCommand::update(
                "a1",
                HashMap::from([("f".to_string(), json!(["1"]))]),
                vec![],
                true,
                None,
            ))
            .await
            .unwrap();

        let history = store.history().await;
        assert_eq!(history.len(), 1);
        assert!(history[0].autosave);
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let store = InMemoryAnswerStore::new();
        store.seed("a1", HashMap::from([("f".to_string(), json!("v"))])).await;
        store.clear().await;

        let set = store
            .query(AnswerQuery::AssessmentVersionQuery {
                id: "a1".to_string(),
            })
            .await
            .unwrap();
        assert!(set.answers.is_empty());
        assert!(store.history().await.is_empty());
    }
}
