//! The assembled per-function binary record and a decoder over it.
//!
//! The decoder walks the variable-width stream using the opcode operand
//! tables. It backs the `Display` disassembly and lets tests check exact
//! operand values instead of raw bytes.

use super::opcode::{Opcode, OperandKind};
use crate::debug_info::DebugSourceLocation;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// One exception table row: faults in `[start, end)` route to `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandlerEntry {
    /// First covered bytecode offset.
    pub start: u32,
    /// One past the last covered offset.
    pub end: u32,
    /// Bytecode offset of the handler's `Catch`.
    pub handler: u32,
}

/// A compiled function: the instruction stream plus every side table the
/// interpreter and debugger need.
#[derive(Debug)]
pub struct BytecodeFunction {
    /// Function name.
    pub name: Arc<str>,
    /// The binary instruction stream.
    pub bytecode: Vec<u8>,
    /// Number of registers the frame needs.
    pub frame_size: u32,
    /// Declared parameter count.
    pub param_count: u32,
    /// Exception coverage, in region order.
    pub exception_table: Vec<ExceptionHandlerEntry>,
    /// Flat switch dispatch table; slots are `target - switch_offset`.
    pub jump_table: Vec<u32>,
    /// Resolved debug locations, in address order.
    pub debug_locations: Vec<DebugSourceLocation>,
    /// Lexical variable names, present only under full debug info.
    pub debug_variable_names: Vec<Arc<str>>,
    /// Highest allocated property read cache slot (0 = none).
    pub highest_read_cache_index: u8,
    /// Highest allocated property write cache slot (0 = none).
    pub highest_write_cache_index: u8,
}

/// A decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstr {
    /// The opcode.
    pub opcode: Opcode,
    /// Operand values in layout order. Register and unsigned operands are
    /// zero-extended; jump offsets are sign-extended; doubles carry their
    /// raw bit pattern.
    pub operands: SmallVec<[i64; 6]>,
    /// Encoded size in bytes.
    pub size: u32,
}

impl DecodedInstr {
    /// The jump offset operand, for jump opcodes.
    pub fn jump_offset(&self) -> i32 {
        debug_assert!(self.opcode.is_jump());
        self.operands[0] as i32
    }
}

/// Decode the instruction at `offset`, or `None` if the byte there is not
/// a valid opcode.
pub fn decode_at(bytes: &[u8], offset: u32) -> Option<DecodedInstr> {
    let mut at = offset as usize;
    let opcode = Opcode::from_u8(*bytes.get(at)?)?;
    at += 1;

    let mut operands = SmallVec::new();
    for &kind in opcode.operands() {
        let width = kind.width() as usize;
        let raw = bytes.get(at..at + width)?;
        let value = match kind {
            OperandKind::Reg8 | OperandKind::UInt8 => i64::from(raw[0]),
            OperandKind::Imm8 => i64::from(raw[0] as i8),
            OperandKind::UInt16 => i64::from(u16::from_le_bytes(raw.try_into().ok()?)),
            OperandKind::Reg32 | OperandKind::UInt32 => {
                i64::from(u32::from_le_bytes(raw.try_into().ok()?))
            }
            OperandKind::Imm32 => i64::from(i32::from_le_bytes(raw.try_into().ok()?)),
            OperandKind::Double => u64::from_le_bytes(raw.try_into().ok()?) as i64,
        };
        operands.push(value);
        at += width;
    }

    Some(DecodedInstr {
        opcode,
        operands,
        size: opcode.size(),
    })
}

impl BytecodeFunction {
    /// Decode every instruction in stream order.
    ///
    /// Panics on a malformed stream; the builder can only produce
    /// well-formed ones.
    pub fn decode(&self) -> Vec<(u32, DecodedInstr)> {
        let mut out = Vec::new();
        let mut offset = 0u32;
        while (offset as usize) < self.bytecode.len() {
            let instr = decode_at(&self.bytecode, offset)
                .unwrap_or_else(|| panic!("malformed bytecode at offset {offset}"));
            let size = instr.size;
            out.push((offset, instr));
            offset += size;
        }
        out
    }

    /// Find the decoded instruction at an exact offset.
    pub fn instr_at(&self, offset: u32) -> Option<DecodedInstr> {
        decode_at(&self.bytecode, offset)
    }

    /// Collect `(offset, opcode)` pairs, a compact shape for assertions.
    pub fn opcodes(&self) -> Vec<(u32, Opcode)> {
        self.decode()
            .into_iter()
            .map(|(off, i)| (off, i.opcode))
            .collect()
    }
}

impl fmt::Display for BytecodeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function {} (params: {}, frame: {})",
            self.name, self.param_count, self.frame_size
        )?;
        for (offset, instr) in self.decode() {
            write!(f, "  {offset:4}: {}", instr.opcode)?;
            for (i, operand) in instr.operands.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{operand}")?;
            }
            writeln!(f)?;
        }
        for entry in &self.exception_table {
            writeln!(
                f,
                "  try [{}, {}) -> {}",
                entry.start, entry.end, entry.handler
            )?;
        }
        Ok(())
    }
}
