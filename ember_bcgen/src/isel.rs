//! Instruction selection.
//!
//! Walks the scheduled blocks in order and emits the binary stream,
//! choosing short or long opcode variants by operand magnitude. Operands
//! that depend on final addresses (jump targets, catch sites, switch
//! defaults) are emitted as placeholders and recorded as relocations for
//! the relaxation engine; relocations are created in strictly increasing
//! stream offset order.
//!
//! One selector instance compiles exactly one function: the output
//! buffer, relocation list, cache counters, and debug id cache are all
//! owned here and handed over as a [`SelectionOutput`] when the walk
//! finishes.

use crate::bytecode::stream::BytecodeBuilder;
use crate::bytecode::Opcode;
use crate::cache::PropertyCacheAllocator;
use crate::codegen::CodegenOptions;
use crate::debug_info::DebugInfoLevel;
use crate::ir::{
    BinaryOp, BlockId, CompareOp, Function, InstrId, InstrKind, PropertyKey, RegisterFile,
    UnaryOp, CALL_EXTRA_REGISTERS,
};
use crate::reloc::{BlockAddressMap, RelocKind, RelocTarget, Relocation, SwitchDescriptor};
use crate::sched::Schedule;
use ember_core::{Diagnostics, EmberError, EmberResult};
use rustc_hash::{FxHashMap, FxHashSet};

/// Everything the selector produced for one function, ready for
/// relaxation and table building.
#[derive(Debug)]
pub struct SelectionOutput {
    /// The emitted stream and accumulated tables.
    pub builder: BytecodeBuilder,
    /// Deferred fixups in stream order.
    pub relocations: Vec<Relocation>,
    /// Initial block addresses plus the end sentinel.
    pub blocks: BlockAddressMap,
    /// Catch instruction coverage-start offsets.
    pub catch_offsets: FxHashMap<InstrId, u32>,
    /// Staged switch descriptors.
    pub switches: Vec<SwitchDescriptor>,
    /// Switch instruction to descriptor index.
    pub switch_of: FxHashMap<InstrId, usize>,
    /// The property cache allocator with its final counters.
    pub cache: PropertyCacheAllocator,
}

/// The set of blocks that need an async break check: targets of backward
/// edges in emission order. A block jumping to itself counts.
fn blocks_with_backward_successors(func: &Function, order: &[BlockId]) -> FxHashSet<BlockId> {
    let mut seen: FxHashSet<BlockId> = FxHashSet::default();
    let mut result = FxHashSet::default();
    for &block in order {
        seen.insert(block);
        if let Some(term) = func.block(block).terminator() {
            func.instr(term).kind.for_each_successor(|succ| {
                if seen.contains(&succ) {
                    result.insert(succ);
                }
            });
        }
    }
    result
}

/// The long-form jump opcode for a fused compare-and-branch, with the
/// polarity flipped when the true side falls through.
fn compare_jump_opcode(op: CompareOp, invert: bool) -> Opcode {
    use Opcode::*;
    match (op, invert) {
        (CompareOp::Less, false) => JLessLong,
        (CompareOp::Less, true) => JNotLessLong,
        (CompareOp::LessEqual, false) => JLessEqualLong,
        (CompareOp::LessEqual, true) => JNotLessEqualLong,
        (CompareOp::Greater, false) => JGreaterLong,
        (CompareOp::Greater, true) => JNotGreaterLong,
        (CompareOp::GreaterEqual, false) => JGreaterEqualLong,
        (CompareOp::GreaterEqual, true) => JNotGreaterEqualLong,
        (CompareOp::Equal, false) => JEqualLong,
        (CompareOp::Equal, true) => JNotEqualLong,
        (CompareOp::NotEqual, false) => JNotEqualLong,
        (CompareOp::NotEqual, true) => JEqualLong,
        (CompareOp::StrictEqual, false) => JStrictEqualLong,
        (CompareOp::StrictEqual, true) => JStrictNotEqualLong,
        (CompareOp::StrictNotEqual, false) => JStrictNotEqualLong,
        (CompareOp::StrictNotEqual, true) => JStrictEqualLong,
    }
}

/// Lowers one scheduled function to bytecode.
#[derive(Debug)]
pub struct Selector<'a> {
    func: &'a Function,
    regs: &'a RegisterFile,
    options: &'a CodegenOptions,
    diagnostics: &'a mut Diagnostics,
    builder: BytecodeBuilder,
    relocations: Vec<Relocation>,
    blocks: BlockAddressMap,
    catch_offsets: FxHashMap<InstrId, u32>,
    switches: Vec<SwitchDescriptor>,
    switch_of: FxHashMap<InstrId, usize>,
    cache: PropertyCacheAllocator,
    async_check_blocks: FxHashSet<BlockId>,
}

impl<'a> Selector<'a> {
    /// Create a selector for one function.
    pub fn new(
        func: &'a Function,
        regs: &'a RegisterFile,
        options: &'a CodegenOptions,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            func,
            regs,
            options,
            diagnostics,
            builder: BytecodeBuilder::new(),
            relocations: Vec::new(),
            blocks: BlockAddressMap::new(),
            catch_offsets: FxHashMap::default(),
            switches: Vec::new(),
            switch_of: FxHashMap::default(),
            cache: PropertyCacheAllocator::new(options.reuse_prop_cache),
            async_check_blocks: FxHashSet::default(),
        }
    }

    /// Generate the whole function in schedule order.
    pub fn run(mut self, sched: &Schedule) -> EmberResult<SelectionOutput> {
        if self.options.debug_info == DebugInfoLevel::Full || self.options.async_break_checks {
            self.async_check_blocks = blocks_with_backward_successors(self.func, &sched.order);
            if let Some(&first) = sched.order.first() {
                self.async_check_blocks.insert(first);
            }
        }

        for (i, &block) in sched.order.iter().enumerate() {
            let next = sched.order.get(i + 1).copied();
            self.generate_block(block, next)?;
        }
        self.blocks.set_end_offset(self.builder.current_offset());

        Ok(SelectionOutput {
            builder: self.builder,
            relocations: self.relocations,
            blocks: self.blocks,
            catch_offsets: self.catch_offsets,
            switches: self.switches,
            switch_of: self.switch_of,
            cache: self.cache,
        })
    }

    #[inline]
    fn reg(&self, id: InstrId) -> u32 {
        self.regs.register(id).index()
    }

    fn register_long_jump(&mut self, loc: u32, target: BlockId) {
        self.relocations.push(Relocation {
            offset: loc,
            kind: RelocKind::LongJump,
            target: RelocTarget::Block(target),
        });
    }

    fn emit_mov_if_needed(&mut self, dst: u32, src: u32) {
        if dst == src {
            return;
        }
        if dst <= u8::MAX as u32 && src <= u8::MAX as u32 {
            self.builder.emit_mov(dst, src);
        } else {
            self.builder.emit_mov_long(dst, src);
        }
    }

    /// Check the calling convention: arguments of a generic call occupy
    /// the contiguous range just below the reserved slots at the frame
    /// top, outermost argument highest; fixed-arity call arguments may
    /// sit anywhere below that range.
    fn verify_call(&self, args: &[InstrId], explicit_regs: bool) {
        if cfg!(debug_assertions) {
            let last_arg = self.regs.frame_size() - 1 - CALL_EXTRA_REGISTERS;
            for (i, &arg) in args.iter().enumerate() {
                let reg = self.regs.register(arg).index();
                if explicit_regs {
                    assert!(
                        reg <= last_arg - args.len() as u32,
                        "argument {i} in r{reg} overlaps the outgoing frame"
                    );
                } else {
                    assert_eq!(
                        reg,
                        last_arg - i as u32,
                        "argument {i} is not in its frame slot"
                    );
                }
            }
        }
    }

    fn generate_block(&mut self, block: BlockId, next: Option<BlockId>) -> EmberResult<()> {
        // Register the block before emitting anything so relocations
        // stay sorted by offset.
        let loc = self.builder.current_offset();
        self.relocations.push(Relocation {
            offset: loc,
            kind: RelocKind::BlockMarker,
            target: RelocTarget::Block(block),
        });
        self.blocks.insert(block, loc, next);

        let terminator = self.func.block(block).terminator();
        let needs_check = self.async_check_blocks.contains(&block);
        for &id in &self.func.block(block).instrs {
            // The check sits right before the terminator so the block's
            // own setup (environment creation) runs first.
            if needs_check && Some(id) == terminator {
                self.builder.emit_async_break_check();
            }
            self.generate_instr(id, next)?;
        }
        Ok(())
    }

    fn place_debug_marker(&mut self, id: InstrId) {
        let data = self.func.instr(id);
        let wanted = match self.options.debug_info {
            DebugInfoLevel::None => false,
            DebugInfoLevel::Throwing => data.kind.may_throw(),
            DebugInfoLevel::SourceMap | DebugInfoLevel::Full => true,
        };
        if wanted && data.span.is_some() && self.func.buffer.is_some() {
            self.relocations.push(Relocation {
                offset: self.builder.current_offset(),
                kind: RelocKind::DebugMarker,
                target: RelocTarget::Instr(id),
            });
        }
    }

    fn generate_instr(&mut self, id: InstrId, next: Option<BlockId>) -> EmberResult<()> {
        self.place_debug_marker(id);

        match &self.func.instr(id).kind {
            InstrKind::LoadConst(literal) => {
                let dst = self.reg(id);
                use crate::ir::Literal;
                match *literal {
                    Literal::Undefined => {
                        self.builder
                            .emit_load_literal(Opcode::LoadConstUndefined, dst);
                    }
                    Literal::Null => {
                        self.builder.emit_load_literal(Opcode::LoadConstNull, dst);
                    }
                    Literal::Bool(true) => {
                        self.builder.emit_load_literal(Opcode::LoadConstTrue, dst);
                    }
                    Literal::Bool(false) => {
                        self.builder.emit_load_literal(Opcode::LoadConstFalse, dst);
                    }
                    Literal::Number(n) => {
                        if literal.is_positive_zero() {
                            self.builder.emit_load_literal(Opcode::LoadConstZero, dst);
                        } else if let Some(v) = literal.as_uint8() {
                            self.builder.emit_load_const_uint8(dst, v);
                        } else if let Some(v) = literal.as_int32() {
                            self.builder.emit_load_const_int(dst, v);
                        } else {
                            self.builder.emit_load_const_double(dst, n);
                        }
                    }
                    Literal::String(sid) => {
                        if sid.0 <= u16::MAX as u32 {
                            self.builder.emit_load_const_string(dst, sid.0 as u16);
                        } else {
                            self.builder.emit_load_const_string_long(dst, sid.0);
                        }
                    }
                }
            }

            InstrKind::LoadParam(index) => {
                let dst = self.reg(id);
                if *index <= u8::MAX as u32 {
                    self.builder.emit_load_param(dst, *index as u8);
                } else {
                    self.builder.emit_load_param_long(dst, *index);
                }
            }

            InstrKind::Mov(src) | InstrKind::SpillMov(src) => {
                let dst = self.reg(id);
                let src = self.reg(*src);
                self.emit_mov_if_needed(dst, src);
            }

            // Implicit movs only mark registers a later instruction
            // writes; phis were lowered to movs by the allocator; try
            // ends exist for region bookkeeping only.
            InstrKind::ImplicitMov(_) | InstrKind::Phi(_) | InstrKind::TryEnd => {}

            InstrKind::Unary { op, src } => {
                let opcode = match op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::BitNot => Opcode::BitNot,
                    UnaryOp::TypeOf => Opcode::TypeOf,
                };
                let dst = self.reg(id);
                let src = self.reg(*src);
                self.builder.emit_reg2(opcode, dst, src);
            }

            InstrKind::Binary { op, lhs, rhs } => {
                let numeric = self.func.instr(*lhs).ty.is_numeric()
                    && self.func.instr(*rhs).ty.is_numeric();
                let opcode = match (op, numeric) {
                    (BinaryOp::Add, false) => Opcode::Add,
                    (BinaryOp::Add, true) => Opcode::AddN,
                    (BinaryOp::Sub, false) => Opcode::Sub,
                    (BinaryOp::Sub, true) => Opcode::SubN,
                    (BinaryOp::Mul, false) => Opcode::Mul,
                    (BinaryOp::Mul, true) => Opcode::MulN,
                    (BinaryOp::Div, false) => Opcode::Div,
                    (BinaryOp::Div, true) => Opcode::DivN,
                    (BinaryOp::Mod, _) => Opcode::Mod,
                };
                let dst = self.reg(id);
                let l = self.reg(*lhs);
                let r = self.reg(*rhs);
                self.builder.emit_reg3(opcode, dst, l, r);
            }

            InstrKind::Compare { op, lhs, rhs } => {
                let opcode = match op {
                    CompareOp::Less => Opcode::Less,
                    CompareOp::LessEqual => Opcode::LessEqual,
                    CompareOp::Greater => Opcode::Greater,
                    CompareOp::GreaterEqual => Opcode::GreaterEqual,
                    CompareOp::Equal => Opcode::Equal,
                    CompareOp::NotEqual => Opcode::NotEqual,
                    CompareOp::StrictEqual => Opcode::StrictEqual,
                    CompareOp::StrictNotEqual => Opcode::StrictNotEqual,
                };
                let dst = self.reg(id);
                let l = self.reg(*lhs);
                let r = self.reg(*rhs);
                self.builder.emit_reg3(opcode, dst, l, r);
            }

            InstrKind::GetProperty { object, key } => {
                let dst = self.reg(id);
                let obj = self.reg(*object);
                match key {
                    PropertyKey::Id(sid) => {
                        let slot = self.cache.acquire_read(*sid);
                        if sid.0 <= u16::MAX as u32 {
                            self.builder.emit_get_by_id(dst, obj, slot, sid.0 as u16);
                        } else {
                            self.builder.emit_get_by_id_long(dst, obj, slot, sid.0);
                        }
                    }
                    PropertyKey::Value(k) => {
                        let k = self.reg(*k);
                        self.builder.emit_reg3(Opcode::GetByVal, dst, obj, k);
                    }
                }
            }

            InstrKind::SetProperty { object, key, value } => {
                let obj = self.reg(*object);
                let value = self.reg(*value);
                match key {
                    PropertyKey::Id(sid) => {
                        let slot = self.cache.acquire_write(*sid);
                        if sid.0 <= u16::MAX as u32 {
                            self.builder.emit_put_by_id(obj, value, slot, sid.0 as u16);
                        } else {
                            self.builder.emit_put_by_id_long(obj, value, slot, sid.0);
                        }
                    }
                    PropertyKey::Value(k) => {
                        let k = self.reg(*k);
                        self.builder.emit_reg3(Opcode::PutByVal, obj, k, value);
                    }
                }
            }

            InstrKind::Call { callee, args } => {
                self.verify_call(args, false);
                let dst = self.reg(id);
                let callee = self.reg(*callee);
                if args.len() <= u8::MAX as usize {
                    self.builder.emit_call(dst, callee, args.len() as u8);
                } else {
                    self.builder.emit_call_long(dst, callee, args.len() as u32);
                }
            }

            InstrKind::CallN { callee, args } => {
                self.verify_call(args, true);
                let dst = self.reg(id);
                let callee = self.reg(*callee);
                let arg_regs: smallvec::SmallVec<[u32; 4]> =
                    args.iter().map(|&a| self.reg(a)).collect();
                self.builder.emit_call_n(dst, callee, &arg_regs);
            }

            InstrKind::CreateEnvironment => {
                let dst = self.reg(id);
                self.builder.emit_create_environment(dst);
            }

            InstrKind::ResolveEnvironment { depth } => {
                debug_assert!(*depth > 0, "resolving the current environment");
                let hops = depth - 1;
                if hops > u8::MAX as u32 {
                    let error = EmberError::CaptureDepthExceeded {
                        depth: *depth,
                        max: u8::MAX as u32 + 1,
                        span: self.func.instr(id).span,
                    };
                    self.diagnostics.report(error.clone());
                    return Err(error);
                }
                let dst = self.reg(id);
                self.builder.emit_get_environment(dst, hops as u8);
            }

            InstrKind::LoadFromEnvironment { env, slot } => {
                let dst = self.reg(id);
                let env = self.reg(*env);
                if *slot <= u8::MAX as u32 {
                    self.builder.emit_load_from_environment(dst, env, *slot as u8);
                } else if *slot <= u16::MAX as u32 {
                    self.builder
                        .emit_load_from_environment_long(dst, env, *slot as u16);
                } else {
                    panic!("environment slot {slot} exceeds the encodable range");
                }
            }

            InstrKind::StoreToEnvironment { env, slot, value } => {
                let env = self.reg(*env);
                let value = self.reg(*value);
                if *slot <= u8::MAX as u32 {
                    self.builder
                        .emit_store_to_environment(env, *slot as u8, value);
                } else if *slot <= u16::MAX as u32 {
                    self.builder
                        .emit_store_to_environment_long(env, *slot as u16, value);
                } else {
                    panic!("environment slot {slot} exceeds the encodable range");
                }
            }

            InstrKind::CreateClosure { env, function } => {
                let dst = self.reg(id);
                let env = self.reg(*env);
                if *function <= u16::MAX as u32 {
                    self.builder
                        .emit_create_closure(dst, env, *function as u16);
                } else {
                    self.builder.emit_create_closure_long(dst, env, *function);
                }
            }

            InstrKind::Catch => {
                let dst = self.reg(id);
                let loc = self.builder.emit_catch(dst);
                self.relocations.push(Relocation {
                    offset: loc,
                    kind: RelocKind::CatchMarker,
                    target: RelocTarget::Instr(id),
                });
                self.catch_offsets.insert(id, loc);
            }

            InstrKind::Debugger => {
                self.builder.emit_debugger();
            }

            InstrKind::Unreachable => {
                if cfg!(debug_assertions) {
                    self.builder.emit_unreachable();
                }
            }

            InstrKind::Ret(value) => {
                let value = self.reg(*value);
                self.builder.emit_ret(value);
            }

            InstrKind::Throw(value) => {
                let value = self.reg(*value);
                self.builder.emit_throw(value);
            }

            InstrKind::Branch { target } => {
                if Some(*target) == next {
                    return Ok(());
                }
                let loc = self.builder.emit_jmp_long();
                self.register_long_jump(loc, *target);
            }

            InstrKind::TryStart { body, .. } => {
                // Entering a try region is a plain branch to the body;
                // the region itself lives in the exception table, not
                // the stream.
                if Some(*body) == next {
                    return Ok(());
                }
                let loc = self.builder.emit_jmp_long();
                self.register_long_jump(loc, *body);
            }

            InstrKind::CondBranch {
                cond,
                on_true,
                on_false,
            } => {
                let cond = self.reg(*cond);
                if Some(*on_true) == next {
                    // Fall through to the true side, branch on false.
                    let loc = self.builder.emit_cond_jmp_long(Opcode::JmpFalseLong, cond);
                    self.register_long_jump(loc, *on_false);
                    return Ok(());
                }
                let loc = self.builder.emit_cond_jmp_long(Opcode::JmpTrueLong, cond);
                self.register_long_jump(loc, *on_true);
                if Some(*on_false) != next {
                    let loc = self.builder.emit_jmp_long();
                    self.register_long_jump(loc, *on_false);
                }
            }

            InstrKind::CompareBranch {
                op,
                lhs,
                rhs,
                on_true,
                on_false,
            } => {
                let l = self.reg(*lhs);
                let r = self.reg(*rhs);
                let (mut taken, mut fallthrough) = (*on_true, *on_false);
                let mut invert = false;
                if Some(*on_true) == next {
                    invert = true;
                    std::mem::swap(&mut taken, &mut fallthrough);
                }
                let opcode = compare_jump_opcode(*op, invert);
                let loc = self.builder.emit_cmp_jmp_long(opcode, l, r);
                self.register_long_jump(loc, taken);
                if Some(fallthrough) != next {
                    let loc = self.builder.emit_jmp_long();
                    self.register_long_jump(loc, fallthrough);
                }
            }

            InstrKind::SwitchImm {
                value,
                default,
                min,
                size,
                cases,
            } => {
                let mut table = vec![*default; *size as usize];
                for &(case_value, target) in cases {
                    table[(case_value - min) as usize] = target;
                }
                let value = self.reg(*value);
                let loc = self
                    .builder
                    .emit_switch_imm(value, *min, min + size - 1);
                self.relocations.push(Relocation {
                    offset: loc,
                    kind: RelocKind::SwitchDispatch,
                    target: RelocTarget::Instr(id),
                });
                self.switch_of.insert(id, self.switches.len());
                self.switches.push(SwitchDescriptor {
                    offset: loc,
                    default: *default,
                    min: *min,
                    table,
                });
            }

            InstrKind::Switch { .. } => {
                unreachable!("sparse switch must be lowered before instruction selection")
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Literal, Register, Type};

    fn options() -> CodegenOptions {
        CodegenOptions::default()
    }

    fn select(func: &Function, regs: &RegisterFile, options: &CodegenOptions) -> SelectionOutput {
        let sched = Schedule::compute(func);
        let mut diagnostics = Diagnostics::new();
        Selector::new(func, regs, options, &mut diagnostics)
            .run(&sched)
            .expect("selection succeeds")
    }

    #[test]
    fn test_fallthrough_branch_emits_nothing() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let b1 = f.add_block();
        f.add_instr(f.entry, InstrKind::Branch { target: b1 }, Type::Any, None);
        let v = f.add_instr(b1, InstrKind::LoadConst(Literal::Undefined), Type::Undefined, None);
        f.add_instr(b1, InstrKind::Ret(v), Type::Any, None);
        regs.assign(v, Register(0));

        let out = select(&f, &regs, &options());
        // Only the load and the return hit the stream.
        assert_eq!(
            out.builder.current_offset(),
            Opcode::LoadConstUndefined.size() + Opcode::Ret.size()
        );
    }

    #[test]
    fn test_cond_branch_picks_fallthrough_side() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let then_b = f.add_block();
        let else_b = f.add_block();
        let c = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Any, None);
        f.add_instr(
            f.entry,
            InstrKind::CondBranch {
                cond: c,
                on_true: then_b,
                on_false: else_b,
            },
            Type::Any,
            None,
        );
        let v1 = f.add_instr(then_b, InstrKind::LoadConst(Literal::Undefined), Type::Undefined, None);
        f.add_instr(then_b, InstrKind::Ret(v1), Type::Any, None);
        let v2 = f.add_instr(else_b, InstrKind::LoadConst(Literal::Null), Type::Null, None);
        f.add_instr(else_b, InstrKind::Ret(v2), Type::Any, None);
        regs.assign(c, Register(0));
        regs.assign(v1, Register(1));
        regs.assign(v2, Register(1));

        let out = select(&f, &regs, &options());
        // The scheduler emits else_b right after entry (the true arm is
        // visited first in the post-order walk, so it lands last), so
        // the branch tests the true side and falls through to the false
        // side with no second jump.
        let bytes = out.builder.bytes();
        assert_eq!(
            bytes[Opcode::LoadParam.size() as usize],
            Opcode::JmpTrueLong as u8
        );
        let jumps: Vec<_> = out
            .relocations
            .iter()
            .filter(|r| r.kind == RelocKind::LongJump)
            .collect();
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0].target, RelocTarget::Block(then_b));
    }

    #[test]
    fn test_numeric_fast_path_selection() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let a = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        let b = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Any, None);
        let fast = f.add_instr(
            f.entry,
            InstrKind::Binary { op: BinaryOp::Add, lhs: a, rhs: a },
            Type::Number,
            None,
        );
        let slow = f.add_instr(
            f.entry,
            InstrKind::Binary { op: BinaryOp::Add, lhs: a, rhs: b },
            Type::Any,
            None,
        );
        f.add_instr(f.entry, InstrKind::Ret(slow), Type::Any, None);
        regs.assign(a, Register(0));
        regs.assign(b, Register(1));
        regs.assign(fast, Register(2));
        regs.assign(slow, Register(3));

        let out = select(&f, &regs, &options());
        let stream = out
            .builder
            .bytes()
            .to_vec();
        assert!(stream.contains(&(Opcode::AddN as u8)));
        assert!(stream.contains(&(Opcode::Add as u8)));
    }

    #[test]
    fn test_calls_encode_frame_and_explicit_forms() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();

        let callee = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Object, None);
        let a0 = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        let a1 = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(2.0)), Type::Number, None);
        let m0 = f.add_instr(f.entry, InstrKind::Mov(a0), Type::Number, None);
        let m1 = f.add_instr(f.entry, InstrKind::Mov(a1), Type::Number, None);
        let mut args = smallvec::SmallVec::new();
        args.push(m0);
        args.push(m1);
        let call = f.add_instr(f.entry, InstrKind::Call { callee, args }, Type::Any, None);

        let i0 = f.add_instr(f.entry, InstrKind::ImplicitMov(call), Type::Any, None);
        let mut n_args = smallvec::SmallVec::new();
        n_args.push(call);
        let call_n = f.add_instr(
            f.entry,
            InstrKind::CallN { callee, args: n_args },
            Type::Any,
            None,
        );
        f.add_instr(f.entry, InstrKind::Ret(call_n), Type::Any, None);

        // Frame: ten registers; the convention reserves the top two, so
        // the outermost argument sits at r7, the next at r6.
        regs.reserve_frame(10);
        regs.assign(callee, Register(0));
        regs.assign(a0, Register(1));
        regs.assign(a1, Register(2));
        regs.assign(m0, Register(7));
        regs.assign(m1, Register(6));
        regs.assign(call, Register(3));
        regs.assign(i0, Register(7));
        regs.assign(call_n, Register(4));

        let out = select(&f, &regs, &options());
        let stream = out.builder.bytes().to_vec();
        assert!(stream.contains(&(Opcode::Call as u8)));
        assert!(stream.contains(&(Opcode::Call1 as u8)));
        // The fixed-arity call encodes the argument's own register, and
        // the implicit mov contributed no bytes.
        let decoded: Vec<_> = {
            let mut offset = 0u32;
            let mut all = Vec::new();
            while (offset as usize) < stream.len() {
                let i = crate::bytecode::decode_at(&stream, offset).unwrap();
                offset += i.size;
                all.push(i);
            }
            all
        };
        let call1 = decoded
            .iter()
            .find(|i| i.opcode == Opcode::Call1)
            .expect("Call1 emitted");
        assert_eq!(call1.operands.as_slice(), &[4, 0, 3]);
    }

    #[test]
    fn test_capture_depth_overflow_is_reported() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let env = f.add_instr(
            f.entry,
            InstrKind::ResolveEnvironment { depth: 300 },
            Type::Environment,
            Some(ember_core::Span::new(10, 20)),
        );
        f.add_instr(f.entry, InstrKind::Ret(env), Type::Any, None);
        regs.assign(env, Register(0));

        let sched = Schedule::compute(&f);
        let opts = options();
        let mut diagnostics = Diagnostics::new();
        let result = Selector::new(&f, &regs, &opts, &mut diagnostics).run(&sched);
        assert!(result.is_err());
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.iter().next().unwrap().span(),
            Some(ember_core::Span::new(10, 20))
        );
    }

    #[test]
    fn test_property_access_routes_through_cache() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let obj = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Object, None);
        let key = f.add_instr(f.entry, InstrKind::LoadParam(1), Type::Any, None);
        let by_id = f.add_instr(
            f.entry,
            InstrKind::GetProperty {
                object: obj,
                key: PropertyKey::Id(crate::ir::StringId(42)),
            },
            Type::Any,
            None,
        );
        let by_val = f.add_instr(
            f.entry,
            InstrKind::GetProperty {
                object: obj,
                key: PropertyKey::Value(key),
            },
            Type::Any,
            None,
        );
        f.add_instr(
            f.entry,
            InstrKind::SetProperty {
                object: obj,
                key: PropertyKey::Id(crate::ir::StringId(42)),
                value: by_val,
            },
            Type::Any,
            None,
        );
        let ret = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Undefined), Type::Undefined, None);
        f.add_instr(f.entry, InstrKind::Ret(ret), Type::Any, None);
        regs.assign(obj, Register(0));
        regs.assign(key, Register(1));
        regs.assign(by_id, Register(2));
        regs.assign(by_val, Register(3));
        regs.assign(ret, Register(4));

        let out = select(&f, &regs, &options());
        // One read slot and one write slot were allocated; the computed
        // key went by-value without touching the cache.
        assert_eq!(out.cache.highest_read_index(), 1);
        assert_eq!(out.cache.highest_write_index(), 1);
        let stream = out.builder.bytes().to_vec();
        assert!(stream.contains(&(Opcode::GetById as u8)));
        assert!(stream.contains(&(Opcode::GetByVal as u8)));
        assert!(stream.contains(&(Opcode::PutById as u8)));
    }
}
