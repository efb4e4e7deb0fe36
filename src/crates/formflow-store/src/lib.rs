//! # formflow-store - Answer Persistence Contract
//!
//! Storage abstraction for saved form answers, consumed by the
//! `formflow-core` step controller. The engine reads a complete answer set
//! before rendering a step and writes answer intents back after submissions
//! and autosaves; this crate defines that boundary and ships an in-memory
//! reference implementation.
//!
//! ## Modules
//!
//! - [`traits`] - the [`AnswerStore`] trait backends implement
//! - [`types`] - [`AnswerQuery`], [`AnswerCommand`], [`AnswerSet`]
//! - [`memory`] - [`InMemoryAnswerStore`] for tests and development
//! - [`error`] - [`StoreError`] and the crate [`Result`]

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::{AppliedCommand, InMemoryAnswerStore};
pub use traits::AnswerStore;
pub use types::{AnswerCommand, AnswerQuery, AnswerSet};
