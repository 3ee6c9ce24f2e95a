//! Constant load value numbering.
//!
//! Tracks, per block and per register, the last instruction that put a
//! known constant there (a literal load, or a mov of one). A later load
//! of the identical constant into the same register is redundant and is
//! deleted; any other write to the register invalidates the tracked
//! value.

use super::Pass;
use crate::ir::{Function, InstrId, InstrKind, Literal, RegisterFile};
use rustc_hash::{FxHashMap, FxHashSet};

/// The constant value numbering pass.
#[derive(Debug, Default)]
pub struct ConstantValueNumbering {
    removed: u32,
}

impl ConstantValueNumbering {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Redundant reloads removed in the last run.
    pub fn removed(&self) -> u32 {
        self.removed
    }
}

/// The constant an instruction writes, when it is a literal load or a
/// mov of one.
fn constant_of(func: &Function, id: InstrId) -> Option<Literal> {
    match func.instr(id).kind {
        InstrKind::LoadConst(lit) => Some(lit),
        InstrKind::Mov(src) => match func.instr(src).kind {
            InstrKind::LoadConst(lit) => Some(lit),
            _ => None,
        },
        _ => None,
    }
}

impl Pass for ConstantValueNumbering {
    fn name(&self) -> &'static str {
        "constant-value-numbering"
    }

    fn run(&mut self, func: &mut Function, regs: &mut RegisterFile) -> bool {
        let mut dead: FxHashSet<InstrId> = FxHashSet::default();
        let mut replacements: Vec<(InstrId, InstrId)> = Vec::new();

        for block_index in 0..func.block_count() {
            let block_id = crate::ir::BlockId(block_index as u32);
            // Last constant-producing instruction per register.
            let mut constant_in_reg: FxHashMap<u32, InstrId> = FxHashMap::default();

            for &id in &func.block(block_id).instrs {
                let Some(reg) = regs.get(id) else {
                    continue;
                };
                let r = reg.index();

                if let Some(literal) = constant_of(func, id) {
                    if let Some(&prev) = constant_in_reg.get(&r) {
                        let prev_literal = constant_of(func, prev)
                            .expect("tracked instruction produces a constant");
                        if prev_literal == literal {
                            replacements.push((id, prev));
                            dead.insert(id);
                            self.removed += 1;
                            continue;
                        }
                    }
                    constant_in_reg.insert(r, id);
                } else {
                    constant_in_reg.remove(&r);
                }
            }
        }

        for (from, to) in replacements {
            func.replace_all_uses(from, to);
        }
        func.purge_instrs(&dead);
        self.removed > 0
    }
}
