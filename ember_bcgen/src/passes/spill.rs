//! Mandatory spill insertion for registers beyond the short encodings.
//!
//! Most opcodes encode registers in one byte. When the allocator used
//! more than 256 registers, every assignment is first shifted up to free
//! a small bank of low scratch registers, then each instruction whose
//! output or short-encoded operand landed outside the byte range is
//! rewritten through the scratch bank: operand copies (`SpillMov`) are
//! inserted immediately before the instruction, output write-backs
//! immediately after. An output write-back after a multi-successor
//! terminator goes through the split-edge primitive, one write-back
//! block per successor edge.
//!
//! `Mov`, `SpillMov`, and `Phi` are exempt: they either have long
//! encodings or produce no code. Generic call arguments are exempt too;
//! they live in the frame and are not encoded in the instruction.

use super::Pass;
use crate::ir::{Function, InstrId, InstrKind, Register, RegisterFile};
use smallvec::SmallVec;

/// Scratch registers reserved at the bottom of the frame: enough for the
/// widest encodable operand list (`Call4`: callee + four arguments) plus
/// an output.
pub const RESERVED_SCRATCH: u32 = 6;

/// The spill insertion pass.
#[derive(Debug, Default)]
pub struct SpillRegisters {
    movs_inserted: u32,
}

impl SpillRegisters {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spill movs inserted in the last run.
    pub fn movs_inserted(&self) -> u32 {
        self.movs_inserted
    }
}

/// Whether the instruction's result register must fit the short form.
fn requires_short_output(kind: &InstrKind) -> bool {
    if !kind.has_output() {
        return false;
    }
    // These either have long encodings or never reach the encoder.
    !matches!(
        kind,
        InstrKind::Mov(_)
            | InstrKind::SpillMov(_)
            | InstrKind::ImplicitMov(_)
            | InstrKind::Phi(_)
    )
}

/// Whether operand `index` (in `operands()` order) must fit the short
/// form.
fn requires_short_operand(kind: &InstrKind, index: usize) -> bool {
    match kind {
        InstrKind::Phi(_)
        | InstrKind::Mov(_)
        | InstrKind::SpillMov(_)
        | InstrKind::ImplicitMov(_) => false,
        // Arguments of a generic call are placed in the frame, not
        // encoded; only the callee register appears in the instruction.
        InstrKind::Call { .. } => index == 0,
        _ => true,
    }
}

impl Pass for SpillRegisters {
    fn name(&self) -> &'static str {
        "spill-registers"
    }

    fn run(&mut self, func: &mut Function, regs: &mut RegisterFile) -> bool {
        if regs.frame_size() <= Register::SHORT_MAX + 1 {
            return false;
        }
        regs.shift_all(RESERVED_SCRATCH);

        let block_count = func.block_count();
        for block_index in 0..block_count {
            let block_id = crate::ir::BlockId(block_index as u32);
            let instrs = func.block(block_id).instrs.clone();
            let mut rewritten: Vec<InstrId> = Vec::with_capacity(instrs.len());

            for id in instrs {
                let mut next_scratch = 0u32;
                let mut writebacks: SmallVec<[(InstrId, Register); 2]> = SmallVec::new();
                let mut replace_with_first_spill = false;
                let span = func.instr(id).span;

                if requires_short_output(&func.instr(id).kind) {
                    if let Some(home) = regs.get(id) {
                        if !home.is_short() {
                            let temp = Register(next_scratch);
                            next_scratch += 1;
                            regs.assign(id, temp);
                            writebacks.push((id, home));
                            replace_with_first_spill = true;
                        }
                    }
                }

                let operands = func.instr(id).kind.operands();
                for (op_index, &op) in operands.iter().enumerate() {
                    if !requires_short_operand(&func.instr(id).kind, op_index) {
                        continue;
                    }
                    let Some(op_reg) = regs.get(op) else {
                        continue;
                    };
                    if op_reg.is_short() {
                        continue;
                    }
                    let temp = Register(next_scratch);
                    next_scratch += 1;
                    let ty = func.instr(op).ty;
                    let load = func.new_instr(InstrKind::SpillMov(op), ty, span);
                    regs.assign(load, temp);
                    func.instr_mut(id).kind.replace_operand(op_index, load);
                    rewritten.push(load);
                    self.movs_inserted += 1;
                }
                debug_assert!(next_scratch <= RESERVED_SCRATCH);

                rewritten.push(id);

                if writebacks.is_empty() {
                    continue;
                }

                if func.instr(id).kind.is_terminator() {
                    // A value-producing multi-successor terminator gets
                    // one write-back block per edge.
                    debug_assert!(
                        !replace_with_first_spill,
                        "terminators do not produce replaceable values"
                    );
                    let successors = func.instr(id).kind.successors();
                    for target in successors {
                        let detour = func.split_edge(block_id, target);
                        for &(value, home) in &writebacks {
                            let ty = func.instr(value).ty;
                            let store =
                                func.new_instr(InstrKind::SpillMov(value), ty, span);
                            regs.assign(store, home);
                            // Before the detour's branch.
                            let at = func.block(detour).instrs.len() - 1;
                            func.block_mut(detour).instrs.insert(at, store);
                            self.movs_inserted += 1;
                        }
                    }
                } else {
                    for (index, &(value, home)) in writebacks.iter().enumerate() {
                        let ty = func.instr(value).ty;
                        let store = func.new_instr(InstrKind::SpillMov(value), ty, span);
                        regs.assign(store, home);
                        if replace_with_first_spill && index == 0 {
                            // Users read the write-back; the write-back
                            // itself still reads the instruction.
                            func.replace_all_uses(id, store);
                            if let InstrKind::SpillMov(op) =
                                &mut func.instr_mut(store).kind
                            {
                                *op = id;
                            }
                        }
                        rewritten.push(store);
                        self.movs_inserted += 1;
                    }
                }
            }

            func.block_mut(block_id).instrs = rewritten;
        }
        true
    }
}
