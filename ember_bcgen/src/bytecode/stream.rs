//! Byte stream emission for one function.
//!
//! The [`BytecodeBuilder`] owns the instruction buffer while a function
//! is being generated. The selector appends instructions through the
//! typed `emit_*` methods; the relaxation engine patches jump operands in
//! place and shrinks long jumps; the table builders attach the exception,
//! jump, and debug tables. `finish` seals everything into a
//! [`BytecodeFunction`].

use super::function::{BytecodeFunction, ExceptionHandlerEntry};
use super::opcode::Opcode;
use crate::debug_info::DebugSourceLocation;
use std::sync::Arc;

/// Incremental builder for one function's binary record.
#[derive(Debug, Default)]
pub struct BytecodeBuilder {
    bytes: Vec<u8>,
    exception_handlers: Vec<ExceptionHandlerEntry>,
    debug_locations: Vec<DebugSourceLocation>,
    debug_variable_names: Vec<Arc<str>>,
    jump_table: Vec<u32>,
    highest_read_cache_index: u8,
    highest_write_cache_index: u8,
}

impl BytecodeBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset one past the last emitted byte.
    #[inline]
    pub fn current_offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// The raw bytes emitted so far.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    // =========================================================================
    // Raw emission helpers
    // =========================================================================

    #[inline]
    fn op(&mut self, opcode: Opcode) -> u32 {
        let loc = self.current_offset();
        self.bytes.push(opcode as u8);
        loc
    }

    #[inline]
    fn reg8(&mut self, reg: u32) {
        debug_assert!(reg <= u8::MAX as u32, "register r{reg} needs the long form");
        self.bytes.push(reg as u8);
    }

    #[inline]
    fn reg32(&mut self, reg: u32) {
        self.bytes.extend_from_slice(&reg.to_le_bytes());
    }

    #[inline]
    fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    #[inline]
    fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    #[inline]
    fn f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    // =========================================================================
    // Control / exception
    // =========================================================================

    /// Emit `Unreachable`.
    pub fn emit_unreachable(&mut self) -> u32 {
        self.op(Opcode::Unreachable)
    }

    /// Emit `Ret value`.
    pub fn emit_ret(&mut self, value: u32) -> u32 {
        let loc = self.op(Opcode::Ret);
        self.reg8(value);
        loc
    }

    /// Emit `Throw value`.
    pub fn emit_throw(&mut self, value: u32) -> u32 {
        let loc = self.op(Opcode::Throw);
        self.reg8(value);
        loc
    }

    /// Emit `Catch dst`, the first instruction of a handler.
    pub fn emit_catch(&mut self, dst: u32) -> u32 {
        let loc = self.op(Opcode::Catch);
        self.reg8(dst);
        loc
    }

    /// Emit an async break checkpoint.
    pub fn emit_async_break_check(&mut self) -> u32 {
        self.op(Opcode::AsyncBreakCheck)
    }

    /// Emit a `debugger;` checkpoint.
    pub fn emit_debugger(&mut self) -> u32 {
        self.op(Opcode::Debugger)
    }

    // =========================================================================
    // Jumps
    //
    // Offsets are always the first operand so the relaxation engine can
    // patch any jump at `loc + 1`. Only long forms are ever emitted; the
    // short forms exist solely as relaxation targets.
    // =========================================================================

    /// Emit `JmpLong` with a placeholder offset.
    pub fn emit_jmp_long(&mut self) -> u32 {
        let loc = self.op(Opcode::JmpLong);
        self.i32(0);
        loc
    }

    /// Emit `JmpTrueLong`/`JmpFalseLong` with a placeholder offset.
    pub fn emit_cond_jmp_long(&mut self, opcode: Opcode, cond: u32) -> u32 {
        debug_assert!(matches!(
            opcode,
            Opcode::JmpTrueLong | Opcode::JmpFalseLong
        ));
        let loc = self.op(opcode);
        self.i32(0);
        self.reg8(cond);
        loc
    }

    /// Emit a fused compare-and-branch long form with a placeholder
    /// offset.
    pub fn emit_cmp_jmp_long(&mut self, opcode: Opcode, lhs: u32, rhs: u32) -> u32 {
        debug_assert!(
            opcode.short_form().is_some() && opcode.operands().len() == 3,
            "{opcode} is not a compare-and-branch long form"
        );
        let loc = self.op(opcode);
        self.i32(0);
        self.reg8(lhs);
        self.reg8(rhs);
        loc
    }

    /// Emit `SwitchImm value, <table>, <default>, min, max` with
    /// placeholder table and default fields.
    pub fn emit_switch_imm(&mut self, value: u32, min: u32, max: u32) -> u32 {
        let loc = self.op(Opcode::SwitchImm);
        self.reg8(value);
        self.u32(0); // table start, patched by the jump table builder
        self.i32(0); // default offset, patched during relaxation
        self.u32(min);
        self.u32(max);
        loc
    }

    // =========================================================================
    // Loads and moves
    // =========================================================================

    /// Emit the load for a zero-operand literal.
    pub fn emit_load_literal(&mut self, opcode: Opcode, dst: u32) -> u32 {
        debug_assert!(matches!(
            opcode,
            Opcode::LoadConstUndefined
                | Opcode::LoadConstNull
                | Opcode::LoadConstTrue
                | Opcode::LoadConstFalse
                | Opcode::LoadConstZero
        ));
        let loc = self.op(opcode);
        self.reg8(dst);
        loc
    }

    /// Emit `LoadConstUInt8 dst, value`.
    pub fn emit_load_const_uint8(&mut self, dst: u32, value: u8) -> u32 {
        let loc = self.op(Opcode::LoadConstUInt8);
        self.reg8(dst);
        self.u8(value);
        loc
    }

    /// Emit `LoadConstInt dst, value`.
    pub fn emit_load_const_int(&mut self, dst: u32, value: i32) -> u32 {
        let loc = self.op(Opcode::LoadConstInt);
        self.reg8(dst);
        self.i32(value);
        loc
    }

    /// Emit `LoadConstDouble dst, value`.
    pub fn emit_load_const_double(&mut self, dst: u32, value: f64) -> u32 {
        let loc = self.op(Opcode::LoadConstDouble);
        self.reg8(dst);
        self.f64(value);
        loc
    }

    /// Emit `LoadConstString dst, id`.
    pub fn emit_load_const_string(&mut self, dst: u32, id: u16) -> u32 {
        let loc = self.op(Opcode::LoadConstString);
        self.reg8(dst);
        self.u16(id);
        loc
    }

    /// Emit `LoadConstStringLong dst, id`.
    pub fn emit_load_const_string_long(&mut self, dst: u32, id: u32) -> u32 {
        let loc = self.op(Opcode::LoadConstStringLong);
        self.reg8(dst);
        self.u32(id);
        loc
    }

    /// Emit `LoadParam dst, index`.
    pub fn emit_load_param(&mut self, dst: u32, index: u8) -> u32 {
        let loc = self.op(Opcode::LoadParam);
        self.reg8(dst);
        self.u8(index);
        loc
    }

    /// Emit `LoadParamLong dst, index`.
    pub fn emit_load_param_long(&mut self, dst: u32, index: u32) -> u32 {
        let loc = self.op(Opcode::LoadParamLong);
        self.reg8(dst);
        self.u32(index);
        loc
    }

    /// Emit `Mov dst, src`.
    pub fn emit_mov(&mut self, dst: u32, src: u32) -> u32 {
        let loc = self.op(Opcode::Mov);
        self.reg8(dst);
        self.reg8(src);
        loc
    }

    /// Emit `MovLong dst, src`.
    pub fn emit_mov_long(&mut self, dst: u32, src: u32) -> u32 {
        let loc = self.op(Opcode::MovLong);
        self.reg32(dst);
        self.reg32(src);
        loc
    }

    // =========================================================================
    // Arithmetic and comparison
    // =========================================================================

    /// Emit a three-register operation (`Add`, `Less`, `GetByVal`, ...).
    pub fn emit_reg3(&mut self, opcode: Opcode, dst: u32, lhs: u32, rhs: u32) -> u32 {
        debug_assert_eq!(
            opcode.operands(),
            &[super::opcode::OperandKind::Reg8; 3][..]
        );
        let loc = self.op(opcode);
        self.reg8(dst);
        self.reg8(lhs);
        self.reg8(rhs);
        loc
    }

    /// Emit a two-register operation (`Negate`, `Not`, ...).
    pub fn emit_reg2(&mut self, opcode: Opcode, dst: u32, src: u32) -> u32 {
        debug_assert_eq!(
            opcode.operands(),
            &[super::opcode::OperandKind::Reg8; 2][..]
        );
        let loc = self.op(opcode);
        self.reg8(dst);
        self.reg8(src);
        loc
    }

    // =========================================================================
    // Property access
    // =========================================================================

    /// Emit `GetById dst, object, cache, id`.
    pub fn emit_get_by_id(&mut self, dst: u32, object: u32, cache: u8, id: u16) -> u32 {
        let loc = self.op(Opcode::GetById);
        self.reg8(dst);
        self.reg8(object);
        self.u8(cache);
        self.u16(id);
        loc
    }

    /// Emit `GetByIdLong dst, object, cache, id`.
    pub fn emit_get_by_id_long(&mut self, dst: u32, object: u32, cache: u8, id: u32) -> u32 {
        let loc = self.op(Opcode::GetByIdLong);
        self.reg8(dst);
        self.reg8(object);
        self.u8(cache);
        self.u32(id);
        loc
    }

    /// Emit `PutById object, value, cache, id`.
    pub fn emit_put_by_id(&mut self, object: u32, value: u32, cache: u8, id: u16) -> u32 {
        let loc = self.op(Opcode::PutById);
        self.reg8(object);
        self.reg8(value);
        self.u8(cache);
        self.u16(id);
        loc
    }

    /// Emit `PutByIdLong object, value, cache, id`.
    pub fn emit_put_by_id_long(&mut self, object: u32, value: u32, cache: u8, id: u32) -> u32 {
        let loc = self.op(Opcode::PutByIdLong);
        self.reg8(object);
        self.reg8(value);
        self.u8(cache);
        self.u32(id);
        loc
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Emit `Call dst, callee, argc` (arguments are in the frame).
    pub fn emit_call(&mut self, dst: u32, callee: u32, argc: u8) -> u32 {
        let loc = self.op(Opcode::Call);
        self.reg8(dst);
        self.reg8(callee);
        self.u8(argc);
        loc
    }

    /// Emit `CallLong dst, callee, argc`.
    pub fn emit_call_long(&mut self, dst: u32, callee: u32, argc: u32) -> u32 {
        let loc = self.op(Opcode::CallLong);
        self.reg8(dst);
        self.reg8(callee);
        self.u32(argc);
        loc
    }

    /// Emit `Call1`..`Call4` with explicit argument registers.
    pub fn emit_call_n(&mut self, dst: u32, callee: u32, args: &[u32]) -> u32 {
        let opcode = match args.len() {
            1 => Opcode::Call1,
            2 => Opcode::Call2,
            3 => Opcode::Call3,
            4 => Opcode::Call4,
            n => panic!("CallN supports 1-4 arguments, got {n}"),
        };
        let loc = self.op(opcode);
        self.reg8(dst);
        self.reg8(callee);
        for &a in args {
            self.reg8(a);
        }
        loc
    }

    // =========================================================================
    // Environments and closures
    // =========================================================================

    /// Emit `CreateEnvironment dst`.
    pub fn emit_create_environment(&mut self, dst: u32) -> u32 {
        let loc = self.op(Opcode::CreateEnvironment);
        self.reg8(dst);
        loc
    }

    /// Emit `GetEnvironment dst, hops`.
    pub fn emit_get_environment(&mut self, dst: u32, hops: u8) -> u32 {
        let loc = self.op(Opcode::GetEnvironment);
        self.reg8(dst);
        self.u8(hops);
        loc
    }

    /// Emit `LoadFromEnvironment dst, env, slot`.
    pub fn emit_load_from_environment(&mut self, dst: u32, env: u32, slot: u8) -> u32 {
        let loc = self.op(Opcode::LoadFromEnvironment);
        self.reg8(dst);
        self.reg8(env);
        self.u8(slot);
        loc
    }

    /// Emit `LoadFromEnvironmentLong dst, env, slot`.
    pub fn emit_load_from_environment_long(&mut self, dst: u32, env: u32, slot: u16) -> u32 {
        let loc = self.op(Opcode::LoadFromEnvironmentLong);
        self.reg8(dst);
        self.reg8(env);
        self.u16(slot);
        loc
    }

    /// Emit `StoreToEnvironment env, slot, value`.
    pub fn emit_store_to_environment(&mut self, env: u32, slot: u8, value: u32) -> u32 {
        let loc = self.op(Opcode::StoreToEnvironment);
        self.reg8(env);
        self.u8(slot);
        self.reg8(value);
        loc
    }

    /// Emit `StoreToEnvironmentLong env, slot, value`.
    pub fn emit_store_to_environment_long(&mut self, env: u32, slot: u16, value: u32) -> u32 {
        let loc = self.op(Opcode::StoreToEnvironmentLong);
        self.reg8(env);
        self.u16(slot);
        self.reg8(value);
        loc
    }

    /// Emit `CreateClosure dst, env, function`.
    pub fn emit_create_closure(&mut self, dst: u32, env: u32, function: u16) -> u32 {
        let loc = self.op(Opcode::CreateClosure);
        self.reg8(dst);
        self.reg8(env);
        self.u16(function);
        loc
    }

    /// Emit `CreateClosureLong dst, env, function`.
    pub fn emit_create_closure_long(&mut self, dst: u32, env: u32, function: u32) -> u32 {
        let loc = self.op(Opcode::CreateClosureLong);
        self.reg8(dst);
        self.reg8(env);
        self.u32(function);
        loc
    }

    // =========================================================================
    // Patching
    // =========================================================================

    /// Patch a jump offset operand in place.
    ///
    /// `operand_loc` addresses the offset operand itself (instruction
    /// offset + 1 for every jump form); `width` is 1 or 4.
    pub fn update_jump_target(&mut self, operand_loc: u32, offset: i32, width: u32) {
        let at = operand_loc as usize;
        match width {
            1 => {
                debug_assert!(
                    (-128..128).contains(&offset),
                    "offset {offset} does not fit a short jump"
                );
                self.bytes[at] = offset as i8 as u8;
            }
            4 => {
                self.bytes[at..at + 4].copy_from_slice(&offset.to_le_bytes());
            }
            _ => panic!("invalid jump operand width {width}"),
        }
    }

    /// Narrow the long jump at `inst_loc` to its short form, dropping
    /// three operand bytes and rewriting the opcode.
    pub fn shrink_jump(&mut self, inst_loc: u32) {
        let at = inst_loc as usize;
        let opcode = Opcode::from_u8(self.bytes[at]).expect("valid opcode at jump location");
        let short = opcode
            .short_form()
            .unwrap_or_else(|| panic!("{opcode} has no short form"));
        self.bytes[at] = short as u8;
        // Keep the first offset byte, drop the remaining three.
        self.bytes
            .drain(at + 2..at + 2 + Opcode::LONG_TO_SHORT_SAVINGS as usize);
    }

    /// Patch the table-start field of a `SwitchImm` instruction.
    ///
    /// `operand_loc` addresses the field (instruction offset + 2).
    pub fn update_jump_table_offset(&mut self, operand_loc: u32, table_start: u32) {
        let at = operand_loc as usize;
        self.bytes[at..at + 4].copy_from_slice(&table_start.to_le_bytes());
    }

    // =========================================================================
    // Tables and finalization
    // =========================================================================

    /// Append an exception handler entry.
    pub fn add_exception_handler(&mut self, entry: ExceptionHandlerEntry) {
        self.exception_handlers.push(entry);
    }

    /// Append a resolved debug location record.
    pub fn add_debug_location(&mut self, location: DebugSourceLocation) {
        self.debug_locations.push(location);
    }

    /// Attach the function's debug variable names.
    pub fn set_debug_variable_names(&mut self, names: Vec<Arc<str>>) {
        self.debug_variable_names = names;
    }

    /// Attach the materialized switch jump table.
    pub fn set_jump_table(&mut self, table: Vec<u32>) {
        self.jump_table = table;
    }

    /// Record the highest allocated read cache slot.
    pub fn set_highest_read_cache_index(&mut self, index: u8) {
        self.highest_read_cache_index = index;
    }

    /// Record the highest allocated write cache slot.
    pub fn set_highest_write_cache_index(&mut self, index: u8) {
        self.highest_write_cache_index = index;
    }

    /// Seal the builder into the final function record.
    pub fn finish(self, name: Arc<str>, frame_size: u32, param_count: u32) -> BytecodeFunction {
        BytecodeFunction {
            name,
            bytecode: self.bytes,
            frame_size,
            param_count,
            exception_table: self.exception_handlers,
            jump_table: self.jump_table,
            debug_locations: self.debug_locations,
            debug_variable_names: self.debug_variable_names,
            highest_read_cache_index: self.highest_read_cache_index,
            highest_write_cache_index: self.highest_write_cache_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_and_offsets() {
        let mut b = BytecodeBuilder::new();
        assert_eq!(b.current_offset(), 0);
        let loc = b.emit_mov(1, 2);
        assert_eq!(loc, 0);
        assert_eq!(b.current_offset(), Opcode::Mov.size());
        assert_eq!(b.bytes(), &[Opcode::Mov as u8, 1, 2]);
    }

    #[test]
    fn test_patch_long_jump() {
        let mut b = BytecodeBuilder::new();
        let loc = b.emit_jmp_long();
        b.update_jump_target(loc + 1, -300, 4);
        assert_eq!(
            i32::from_le_bytes(b.bytes()[1..5].try_into().unwrap()),
            -300
        );
    }

    #[test]
    fn test_shrink_jump_rewrites_opcode_and_length() {
        let mut b = BytecodeBuilder::new();
        let loc = b.emit_cond_jmp_long(Opcode::JmpTrueLong, 9);
        b.emit_ret(0);
        let before = b.current_offset();

        b.shrink_jump(loc);
        b.update_jump_target(loc + 1, 5, 1);

        assert_eq!(
            b.current_offset(),
            before - Opcode::LONG_TO_SHORT_SAVINGS
        );
        assert_eq!(b.bytes()[0], Opcode::JmpTrue as u8);
        assert_eq!(b.bytes()[1] as i8, 5);
        // The condition register and the following instruction survive.
        assert_eq!(b.bytes()[2], 9);
        assert_eq!(b.bytes()[3], Opcode::Ret as u8);
    }

    #[test]
    fn test_switch_field_patch() {
        let mut b = BytecodeBuilder::new();
        let loc = b.emit_switch_imm(3, 10, 20);
        b.update_jump_table_offset(loc + 2, 7);
        b.update_jump_target(loc + 6, -42, 4);
        let bytes = b.bytes();
        assert_eq!(u32::from_le_bytes(bytes[2..6].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(bytes[6..10].try_into().unwrap()), -42);
        assert_eq!(u32::from_le_bytes(bytes[10..14].try_into().unwrap()), 10);
        assert_eq!(u32::from_le_bytes(bytes[14..18].try_into().unwrap()), 20);
    }
}
