//! Extensible answer storage trait for custom backend implementations
//!
//! This module defines the **[`AnswerStore`]** trait - the abstraction the form
//! engine talks to whenever it reads or writes saved answers. The engine itself
//! owns no persistence: the step controller prefetches answers through
//! [`AnswerStore::query`] before rendering and commits answer intents through
//! [`AnswerStore::command`] after a submission or autosave. Backends can sit on
//! any storage system (PostgreSQL, Redis, a remote answers service, ...) as long
//! as they honor this contract.
//!
//! # Contract
//!
//! - `query(AssessmentVersionQuery { id })` returns the complete
//!   [`AnswerSet`](crate::AnswerSet) for that assessment version; an unknown id
//!   is `StoreError::NotFound`.
//! - `command(UpdateAssessmentAnswersCommand { added, removed, .. })` merges
//!   `added` over the stored set and removes every key in `removed`, creating
//!   the set if it does not exist yet. `autosave` writes carry partial data and
//!   must not clear fields that were not posted.
//! - Both calls may suspend; the engine never holds evaluation locks across
//!   them.
//!
//! # Implementing a Custom Backend
//!
//! ```rust,ignore
//! use formflow_store::{AnswerStore, AnswerQuery, AnswerCommand, AnswerSet, Result};
//! use async_trait::async_trait;
//!
//! pub struct PostgresAnswerStore {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl AnswerStore for PostgresAnswerStore {
//!     async fn query(&self, query: AnswerQuery) -> Result<AnswerSet> {
//!         let AnswerQuery::AssessmentVersionQuery { id } = query;
//!         // SELECT answers FROM assessments WHERE id = $1 ...
//!         # unimplemented!()
//!     }
//!
//!     async fn command(&self, command: AnswerCommand) -> Result<()> {
//!         // UPDATE assessments SET answers = ... WHERE id = $1
//!         # unimplemented!()
//!     }
//! }
//! ```
//!
//! # See Also
//!
//! - [`InMemoryAnswerStore`](crate::InMemoryAnswerStore) - reference implementation

use crate::error::Result;
use crate::types::{AnswerCommand, AnswerQuery, AnswerSet};
use async_trait::async_trait;

/// Storage backend for saved form answers
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// concurrent requests behind an `Arc`.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Fetch saved answers
    async fn query(&self, query: AnswerQuery) -> Result<AnswerSet>;

    /// Apply an answer mutation
    async fn command(&self, command: AnswerCommand) -> Result<()>;
}
