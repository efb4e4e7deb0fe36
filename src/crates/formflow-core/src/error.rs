//! Error types for form compilation and thunk evaluation
//!
//! Two layers of failure exist in the engine, matching its two phases:
//!
//! - [`CompileError`] - structural problems found while turning a raw
//!   definition into a compiled artifact (unknown tags, misplaced `@self`
//!   references, cyclic dependencies, ...). These fail the whole compilation
//!   and carry the JSON path or node ids involved.
//! - [`ThunkError`] - evaluation-time failures returned by individual thunk
//!   handlers. These are values, not panics: callers decide per node kind
//!   whether to propagate them or coerce to an undefined value (see
//!   [`ThunkErrorKind`] for the category contract).
//!
//! [`EngineError`] is the umbrella the step controller surfaces to hosts; it
//! also absorbs answer-store failures.
//!
//! # Examples
//!
//! ```rust
//! use formflow_core::error::{ThunkError, ThunkErrorKind};
//!
//! let err = ThunkError::lookup_failed("function 'toUpper' is not registered");
//! assert_eq!(err.kind, ThunkErrorKind::LookupFailed);
//! ```

use crate::ast::NodeId;
use thiserror::Error;

/// Convenience result type for compile-phase operations
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Convenience result type for controller-level operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Convenience result type for thunk evaluation
///
/// Defaults to the evaluated JSON value, the payload every handler produces.
pub type ThunkResult<T = serde_json::Value> = std::result::Result<T, ThunkError>;

/// Errors raised while compiling a form definition
#[derive(Error, Debug)]
pub enum CompileError {
    /// A tagged object carried a `type` the transformer does not know
    #[error("Unknown node type '{tag}' at {path}")]
    UnknownNodeType {
        /// JSON path of the offending object
        path: String,
        /// The unrecognized tag
        tag: String,
    },

    /// The definition is structurally invalid (missing or mistyped property)
    #[error("Invalid definition at {path}: {message}")]
    InvalidDefinition {
        /// JSON path of the offending value
        path: String,
        /// What was expected
        message: String,
    },

    /// An `@self` reference appeared outside any field block
    #[error("Self reference outside a field block: {node}")]
    SelfOutsideField {
        /// The reference node
        node: NodeId,
    },

    /// The enclosing field block has no `code` property to substitute
    #[error("Field enclosing self reference has no code: {node}")]
    MissingFieldCode {
        /// The reference node
        node: NodeId,
    },

    /// An `@self` reference appeared inside the field's own `code` property
    #[error("Self reference inside the field's own code: {node}")]
    SelfInsideCode {
        /// The reference node
        node: NodeId,
    },

    /// No step in the journey matched the requested path
    #[error("No step matches path '{path}'")]
    StepNotFound {
        /// The requested step path
        path: String,
    },

    /// Dependency wiring produced a cycle
    #[error("Cyclic dependency involving nodes: {}", format_ids(ids))]
    CyclicDependency {
        /// Node ids on the cycle
        ids: Vec<NodeId>,
    },

    /// A registered node ended up without a compiled handler
    #[error("No thunk handler compiled for node {node}")]
    MissingHandler {
        /// The uncovered node
        node: NodeId,
    },

    /// JSON parse error while loading a definition
    #[error("Definition JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error while loading a definition
    #[error("Definition YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error while loading a definition file
    #[error("Definition I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Category of a runtime thunk failure
///
/// The category decides how consuming nodes may treat the error:
///
/// - `LookupFailed` - a function, component, or pseudo node was not found
/// - `EvaluationFailed` - user code returned an error; the cause is preserved
///   in the message
/// - `TypeMismatch` - a value had the wrong shape (e.g. iterating a non-array,
///   or synchronously invoking an async thunk)
/// - `SecurityViolation` - a property key failed the safe-key check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThunkErrorKind {
    /// Function / component / pseudo-node lookup failed
    LookupFailed,
    /// User code raised an error
    EvaluationFailed,
    /// Value shape did not match what the operation requires
    TypeMismatch,
    /// Property key failed the safe-key check
    SecurityViolation,
}

impl std::fmt::Display for ThunkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ThunkErrorKind::LookupFailed => "LOOKUP_FAILED",
            ThunkErrorKind::EvaluationFailed => "EVALUATION_FAILED",
            ThunkErrorKind::TypeMismatch => "TYPE_MISMATCH",
            ThunkErrorKind::SecurityViolation => "SECURITY_VIOLATION",
        };
        f.write_str(label)
    }
}

/// A typed evaluation failure returned by a thunk handler
///
/// Cloneable so memoized outcomes can carry their error state.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ThunkError {
    /// Failure category
    pub kind: ThunkErrorKind,
    /// Human-readable description, preserving the underlying cause
    pub message: String,
    /// Node the failure is attributed to, when known
    pub node: Option<NodeId>,
}

impl ThunkError {
    /// Lookup failure (missing function, component, or pseudo node)
    pub fn lookup_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ThunkErrorKind::LookupFailed,
            message: message.into(),
            node: None,
        }
    }

    /// Wrapped failure from user code
    pub fn evaluation_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ThunkErrorKind::EvaluationFailed,
            message: message.into(),
            node: None,
        }
    }

    /// Shape mismatch with expected/actual context
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        Self {
            kind: ThunkErrorKind::TypeMismatch,
            message: format!("expected {expected}, got {actual}"),
            node: None,
        }
    }

    /// Unsafe property key
    pub fn security_violation(key: &str) -> Self {
        Self {
            kind: ThunkErrorKind::SecurityViolation,
            message: format!("unsafe property key '{key}'"),
            node: None,
        }
    }

    /// Attribute this error to a node
    pub fn at(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }
}

/// Umbrella error surfaced by the step controller
#[derive(Error, Debug)]
pub enum EngineError {
    /// Compilation failed
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A transition or render evaluation failed hard
    #[error(transparent)]
    Thunk(#[from] ThunkError),

    /// The external answer store failed
    #[error("Answer store error: {0}")]
    Store(#[from] formflow_store::StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IdSpace, NodeId};

    #[test]
    fn test_thunk_error_display_carries_category() {
        let err = ThunkError::type_mismatch("array", "string");
        assert_eq!(err.to_string(), "TYPE_MISMATCH: expected array, got string");
    }

    #[test]
    fn test_thunk_error_attribution() {
        let node = NodeId::new(IdSpace::CompileAst, 7);
        let err = ThunkError::lookup_failed("missing").at(node.clone());
        assert_eq!(err.node, Some(node));
    }

    #[test]
    fn test_cycle_error_lists_ids() {
        let err = CompileError::CyclicDependency {
            ids: vec![
                NodeId::new(IdSpace::CompileAst, 1),
                NodeId::new(IdSpace::CompileAst, 2),
            ],
        };
        let rendered = err.to_string();
        assert!(rendered.contains("compile_ast:1"));
        assert!(rendered.contains("compile_ast:2"));
    }
}
