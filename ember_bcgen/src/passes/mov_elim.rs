//! Move elimination.
//!
//! A `Mov` whose source is defined in the same block and used only by
//! that mov can often be folded away by writing the source's result
//! directly into the mov's destination register. Safety is judged with a
//! per-block forward scan tracking, per register, the positions of the
//! last write and last use. This is a conservative interval
//! approximation, not full liveness: the destination register may be
//! retargeted only if its last write and all of its uses precede the
//! source's position.

use super::Pass;
use crate::ir::{Function, InstrId, InstrKind, RegisterFile};
use rustc_hash::{FxHashMap, FxHashSet};

/// The move elimination pass.
#[derive(Debug, Default)]
pub struct MovElimination {
    eliminated: u32,
}

impl MovElimination {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Movs folded in the last run.
    pub fn eliminated(&self) -> u32 {
        self.eliminated
    }
}

impl Pass for MovElimination {
    fn name(&self) -> &'static str {
        "mov-elimination"
    }

    fn run(&mut self, func: &mut Function, regs: &mut RegisterFile) -> bool {
        let mut use_counts = func.use_counts();
        let mut dead: FxHashSet<InstrId> = FxHashSet::default();
        let mut replacements: Vec<(InstrId, InstrId)> = Vec::new();

        for block_index in 0..func.block_count() {
            let block_id = crate::ir::BlockId(block_index as u32);
            let instrs = func.block(block_id).instrs.clone();

            // Position of each instruction inside this block.
            let position: FxHashMap<InstrId, usize> = instrs
                .iter()
                .enumerate()
                .map(|(i, &id)| (id, i))
                .collect();

            let mut last_write: FxHashMap<u32, usize> = FxHashMap::default();
            let mut last_use: FxHashMap<u32, usize> = FxHashMap::default();

            for (i, &id) in instrs.iter().enumerate() {
                // Record reads of operand registers.
                func.instr(id).kind.for_each_operand(|op| {
                    if let Some(r) = regs.get(op) {
                        last_use.insert(r.index(), i);
                    }
                });

                let mut folded = false;
                if let InstrKind::Mov(src) = func.instr(id).kind {
                    if let (Some(dst_reg), Some(&src_pos)) =
                        (regs.get(id), position.get(&src))
                    {
                        // The precondition is checked, not assumed: the
                        // source must be a single-use, same-block,
                        // non-phi definition that still has a register.
                        let single_use = use_counts[src.0 as usize] == 1;
                        let is_phi =
                            matches!(func.instr(src).kind, InstrKind::Phi(_));
                        if single_use
                            && !is_phi
                            && src_pos < i
                            && regs.is_allocated(src)
                        {
                            let d = dst_reg.index();
                            let write_ok =
                                last_write.get(&d).map_or(true, |&w| w < src_pos);
                            let use_ok =
                                last_use.get(&d).map_or(true, |&u| u <= src_pos);
                            if write_ok && use_ok {
                                // Retarget the source and drop the mov.
                                regs.assign(src, dst_reg);
                                replacements.push((id, src));
                                use_counts[src.0 as usize] =
                                    use_counts[id.0 as usize];
                                use_counts[id.0 as usize] = 0;
                                dead.insert(id);
                                self.eliminated += 1;
                                last_write.insert(d, i);
                                folded = true;
                            }
                        }
                    }
                }

                if !folded {
                    if let Some(r) = regs.get(id) {
                        last_write.insert(r.index(), i);
                    }
                }
            }
        }

        for (from, to) in replacements {
            func.replace_all_uses(from, to);
        }
        func.purge_instrs(&dead);
        self.eliminated > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Literal, Register, Type};

    fn count_movs(func: &Function) -> usize {
        func.block(func.entry)
            .instrs
            .iter()
            .filter(|&&id| matches!(func.instr(id).kind, InstrKind::Mov(_)))
            .count()
    }

    #[test]
    fn test_eliminates_simple_copy() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let a = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        let m = f.add_instr(f.entry, InstrKind::Mov(a), Type::Number, None);
        f.add_instr(f.entry, InstrKind::Ret(m), Type::Any, None);
        regs.assign(a, Register(0));
        regs.assign(m, Register(1));

        let mut pass = MovElimination::new();
        assert!(pass.run(&mut f, &mut regs));
        assert_eq!(pass.eliminated(), 1);
        assert_eq!(count_movs(&f), 0);
        // The load now writes the mov's destination directly.
        assert_eq!(regs.register(a), Register(1));
        // The return reads the load.
        let ret = f.block(f.entry).terminator().unwrap();
        assert_eq!(f.instr(ret).kind, InstrKind::Ret(a));
    }

    #[test]
    fn test_keeps_copy_when_destination_read_later() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        // d is written, then src defined, then d read, then mov src -> d's reg.
        let d = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(5.0)), Type::Number, None);
        let src = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(6.0)), Type::Number, None);
        let use_d = f.add_instr(
            f.entry,
            InstrKind::Binary {
                op: crate::ir::BinaryOp::Add,
                lhs: d,
                rhs: d,
            },
            Type::Number,
            None,
        );
        let m = f.add_instr(f.entry, InstrKind::Mov(src), Type::Number, None);
        f.add_instr(f.entry, InstrKind::Ret(m), Type::Any, None);
        regs.assign(d, Register(0));
        regs.assign(src, Register(2));
        regs.assign(use_d, Register(3));
        regs.assign(m, Register(0));

        // Folding would overwrite r0 before its read at `use_d`.
        let mut pass = MovElimination::new();
        pass.run(&mut f, &mut regs);
        assert_eq!(pass.eliminated(), 0);
        assert_eq!(count_movs(&f), 1);
        assert_eq!(regs.register(src), Register(2));
    }

    #[test]
    fn test_keeps_copy_of_multi_use_source() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let a = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        let m = f.add_instr(f.entry, InstrKind::Mov(a), Type::Number, None);
        let add = f.add_instr(
            f.entry,
            InstrKind::Binary {
                op: crate::ir::BinaryOp::Add,
                lhs: a,
                rhs: m,
            },
            Type::Number,
            None,
        );
        f.add_instr(f.entry, InstrKind::Ret(add), Type::Any, None);
        regs.assign(a, Register(0));
        regs.assign(m, Register(1));
        regs.assign(add, Register(2));

        let mut pass = MovElimination::new();
        pass.run(&mut f, &mut regs);
        assert_eq!(pass.eliminated(), 0);
    }

    #[test]
    fn test_keeps_copy_of_phi() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let a = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        let mut entries = smallvec::SmallVec::new();
        entries.push((a, f.entry));
        let phi = f.add_instr(f.entry, InstrKind::Phi(entries), Type::Number, None);
        let m = f.add_instr(f.entry, InstrKind::Mov(phi), Type::Number, None);
        f.add_instr(f.entry, InstrKind::Ret(m), Type::Any, None);
        regs.assign(a, Register(0));
        regs.assign(phi, Register(1));
        regs.assign(m, Register(2));

        let mut pass = MovElimination::new();
        pass.run(&mut f, &mut regs);
        assert_eq!(pass.eliminated(), 0);
    }

    #[test]
    fn test_keeps_copy_across_blocks() {
        let mut f = Function::new("t", 0);
        let mut regs = RegisterFile::new();
        let b1 = f.add_block();
        let a = f.add_instr(f.entry, InstrKind::LoadConst(Literal::Number(1.0)), Type::Number, None);
        f.add_instr(f.entry, InstrKind::Branch { target: b1 }, Type::Any, None);
        let m = f.add_instr(b1, InstrKind::Mov(a), Type::Number, None);
        f.add_instr(b1, InstrKind::Ret(m), Type::Any, None);
        regs.assign(a, Register(0));
        regs.assign(m, Register(1));

        let mut pass = MovElimination::new();
        pass.run(&mut f, &mut regs);
        assert_eq!(pass.eliminated(), 0);
    }
}
