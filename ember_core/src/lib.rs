//! # Ember Core
//!
//! Foundation types shared across the Ember bytecode compiler:
//!
//! - **Spans**: byte offset ranges into source buffers
//! - **Source Management**: buffer registry with line/column resolution and
//!   the module-wide filename/source-map id table
//! - **Error Handling**: result types, error definitions, and the
//!   diagnostics sink used to report recoverable compilation errors

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod error;
pub mod source;
pub mod span;

pub use error::{Diagnostics, EmberError, EmberResult};
pub use source::{BufferId, FileTable, SourceBuffer, SourceCoords, SourceManager};
pub use span::Span;

/// Ember toolchain version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
