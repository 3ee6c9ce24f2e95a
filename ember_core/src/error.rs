//! Error types and the diagnostics sink for the bytecode backend.
//!
//! Two classes of failure exist in the backend:
//!
//! - Contract violations (an instruction that should have been lowered
//!   before reaching the selector) abort with a panic; they are pipeline
//!   bugs, not user errors.
//! - Recoverable user-facing errors (a program shape that cannot be
//!   encoded) are pushed into a [`Diagnostics`] sink with their source
//!   span and surface as an [`EmberError`] from the compilation entry
//!   point. Other functions in the module are unaffected.

use crate::span::Span;
use thiserror::Error;

/// The unified result type used throughout the backend.
pub type EmberResult<T> = Result<T, EmberError>;

/// Errors reported while lowering a function to bytecode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmberError {
    /// Generic code generation failure.
    #[error("CodegenError: {message}")]
    CodegenError {
        /// Error description.
        message: String,
        /// Source location, when one is known.
        span: Option<Span>,
    },

    /// A captured variable lives too many environments away to encode.
    #[error("RangeError: variable is captured across {depth} scopes, at most {max} are supported")]
    CaptureDepthExceeded {
        /// The required environment hop count.
        depth: u32,
        /// The maximum encodable hop count.
        max: u32,
        /// Source location of the offending access.
        span: Option<Span>,
    },
}

impl EmberError {
    /// The source span this error points at, if any.
    pub fn span(&self) -> Option<Span> {
        match self {
            EmberError::CodegenError { span, .. } => *span,
            EmberError::CaptureDepthExceeded { span, .. } => *span,
        }
    }
}

/// Collects recoverable errors reported during compilation.
///
/// The surrounding driver decides whether to keep compiling the rest of
/// the module after a function fails; the sink just accumulates.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<EmberError>,
}

impl Diagnostics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn report(&mut self, error: EmberError) {
        self.errors.push(error);
    }

    /// Whether any error has been reported.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of reported errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Check whether the sink is empty.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over reported errors in report order.
    pub fn iter(&self) -> impl Iterator<Item = &EmberError> {
        self.errors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_collects_in_order() {
        let mut diags = Diagnostics::new();
        assert!(diags.is_empty());

        diags.report(EmberError::CodegenError {
            message: "first".into(),
            span: None,
        });
        diags.report(EmberError::CaptureDepthExceeded {
            depth: 300,
            max: 255,
            span: Some(Span::new(1, 2)),
        });

        assert_eq!(diags.len(), 2);
        let spans: Vec<_> = diags.iter().map(|e| e.span()).collect();
        assert_eq!(spans, vec![None, Some(Span::new(1, 2))]);
    }

    #[test]
    fn test_error_display() {
        let err = EmberError::CaptureDepthExceeded {
            depth: 300,
            max: 255,
            span: None,
        };
        let text = err.to_string();
        assert!(text.contains("300"));
        assert!(text.contains("255"));
    }
}
