//! Bytecode generation backend for the Ember register-based VM.
//!
//! This crate lowers an already register-allocated, already-optimized IR
//! function into a binary function record:
//!
//! ```text
//! IR Function ──► Register Finalization ──► Instruction Selection
//!                                                   │
//!                 Jump/Exception/Debug tables ◄── Branch Relaxation
//! ```
//!
//! # Key Types
//!
//! - [`Function`] / [`RegisterFile`] - the input IR and its register
//!   assignments
//! - [`CodegenOptions`] - per-module configuration
//! - [`compile_function`] - the one-call entry point
//! - [`BytecodeFunction`] - the assembled output record
//!
//! The individual stages ([`Schedule`], [`Selector`], [`reloc::relax`],
//! the table builders) are public so they can be driven and inspected
//! separately.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod analysis;
pub mod bytecode;
pub mod cache;
pub mod codegen;
pub mod debug_info;
pub mod exceptions;
pub mod ir;
pub mod isel;
pub mod jump_table;
pub mod passes;
pub mod reloc;
pub mod sched;

// Re-export main types
pub use bytecode::{BytecodeFunction, DecodedInstr, ExceptionHandlerEntry, Opcode};
pub use cache::PropertyCacheAllocator;
pub use codegen::{compile_function, CodegenOptions};
pub use debug_info::{DebugInfoLevel, DebugSourceLocation};
pub use ir::{
    BasicBlockData, BlockId, Function, InstrData, InstrId, InstrKind, Literal, PropertyKey,
    Register, RegisterFile, StringId, TryRegion, Type,
};
pub use isel::Selector;
pub use reloc::{BlockAddressMap, RelocKind, Relocation};
pub use sched::Schedule;
