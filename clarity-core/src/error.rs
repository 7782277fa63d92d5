//! Outer error type of the core pipeline.
//!
//! Language-level problems are [`Diagnostic`] values and code generation
//! failures are [`CodegenError`](crate::CodegenError)s. `CoreError` covers
//! what is left: broken compiler invariants. The public entry points in
//! [`compiler`](crate::compiler) never return it; they fold it into the
//! diagnostics list of a `CompileOutput`.

use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::span::Span;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A broken compiler invariant. Not meant for end users.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn internal(message: impl Into<String>) -> CoreError {
        CoreError::Internal(message.into())
    }

    /// A span-less error diagnostic carrying the message.
    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic::error(self.to_string(), Span::dummy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_becomes_an_error_diagnostic() {
        let diag = CoreError::internal("lost a local").into_diagnostic();
        assert!(diag.is_error());
        assert_eq!(diag.message, "internal compiler error: lost a local");
        assert_eq!(diag.span(), Span::dummy());
    }
}
