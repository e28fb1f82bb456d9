//! Error kinds for expression planning and execution.
//!
//! All fallible paths in the crate return `eyre::Result`. Failures that a
//! caller may want to branch on are raised as [`ExprError`] values wrapped in
//! an `eyre::Report`, so they can be recovered with
//! `report.downcast_ref::<ExprError>()` while still composing with
//! `wrap_err` context added along the way.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = eyre::Result<T>;

/// Classified failures raised by the DAG builders, the linearizer, and the
/// executor. Planning-time errors abort construction without side effects;
/// nothing is retried internally.
#[derive(Debug, Error)]
pub enum ExprError {
    /// A node with this name already exists and replacement was forbidden.
    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    /// A name was referenced that is not in the DAG index.
    #[error("Unknown identifier: '{0}'")]
    UnknownIdentifier(String),

    /// Type incompatibility, e.g. ARRAY JOIN over a non-array column or an
    /// overload rejection from a function resolver.
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Internal invariant violation. Seeing this means a bug in the engine,
    /// not in the caller's expression.
    #[error("Logical error: {0}")]
    LogicalError(String),

    /// Plan-time slot budget exceeded.
    #[error("Too many temporary columns: {names}. Maximum: {limit}")]
    TooManyTemporaryColumns { names: String, limit: usize },

    /// Run-time budget of live non-constant columns exceeded.
    #[error("Too many temporary non-const columns:{names}. Maximum: {limit}")]
    TooManyTemporaryNonConstColumns { names: String, limit: usize },
}

impl ExprError {
    /// Shorthand for raising a logical error as an `eyre::Report`.
    pub fn logical(msg: impl Into<String>) -> eyre::Report {
        eyre::Report::new(ExprError::LogicalError(msg.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_through_report() {
        let report = eyre::Report::new(ExprError::DuplicateColumn("x".into()));
        let kind = report.downcast_ref::<ExprError>();
        assert!(matches!(kind, Some(ExprError::DuplicateColumn(name)) if name == "x"));
    }

    #[test]
    fn downcast_survives_wrapping() {
        use eyre::WrapErr;

        let result: Result<()> =
            Err(eyre::Report::new(ExprError::UnknownIdentifier("y".into())));
        let wrapped = result.wrap_err("while building expression").unwrap_err();
        assert!(matches!(
            wrapped.downcast_ref::<ExprError>(),
            Some(ExprError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn messages_name_the_offender() {
        let err = ExprError::TooManyTemporaryColumns {
            names: "a, b, c".into(),
            limit: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("a, b, c"));
        assert!(msg.contains("Maximum: 2"));
    }
}
