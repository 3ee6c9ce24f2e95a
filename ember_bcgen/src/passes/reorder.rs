//! Register reordering.
//!
//! Renumbers registers so that the busiest, most numeric ones cluster at
//! the low indices the short encodings and the interpreter's fast paths
//! favor. Each register accumulates a score of `10^loop_depth` per def or
//! use (depth clamped, integer arithmetic), and a type class: registers
//! holding only numbers rank above registers never holding pointers,
//! which rank above the rest. Registers are sorted descending by
//! `(class, score, original index)` and assigned contiguous indices by
//! rank.
//!
//! Only runs when spilling was not needed: spilling pins values to exact
//! scratch registers that renumbering would tear apart. Registers named
//! by the calling convention (destinations of call-argument movs) keep
//! their indices for the same reason.

use super::Pass;
use crate::analysis::LoopInfo;
use crate::ir::{Function, InstrKind, Register, RegisterFile, Type};
use crate::sched::Schedule;
use rustc_hash::{FxHashMap, FxHashSet};

/// Loop depths beyond this contribute no additional weight.
pub const MAX_SCORED_DEPTH: u32 = 9;

/// Rank of a type for clustering: numeric > non-pointer > pointer.
fn type_class(ty: Type) -> u8 {
    if ty.is_numeric() {
        2
    } else if ty.is_non_pointer() {
        1
    } else {
        0
    }
}

/// The register reordering pass.
#[derive(Debug, Default)]
pub struct ReorderRegisters {
    reordered: u32,
}

impl ReorderRegisters {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers that changed index in the last run.
    pub fn reordered(&self) -> u32 {
        self.reordered
    }
}

impl Pass for ReorderRegisters {
    fn name(&self) -> &'static str {
        "reorder-registers"
    }

    fn run(&mut self, func: &mut Function, regs: &mut RegisterFile) -> bool {
        let sched = Schedule::compute(func);
        let loops = LoopInfo::compute(func, &sched);

        let mut scores: FxHashMap<u32, u64> = FxHashMap::default();
        let mut classes: FxHashMap<u32, u8> = FxHashMap::default();
        let mut pinned: FxHashSet<u32> = FxHashSet::default();

        for &block in &sched.order {
            let weight = 10u64.pow(loops.depth_of(block).min(MAX_SCORED_DEPTH));
            for &id in &func.block(block).instrs {
                let data = func.instr(id);
                if let Some(reg) = regs.get(id) {
                    let r = reg.index();
                    *scores.entry(r).or_insert(0) += weight;
                    // A register's class is its weakest occupant.
                    let class = type_class(data.ty);
                    classes
                        .entry(r)
                        .and_modify(|c| *c = (*c).min(class))
                        .or_insert(class);
                }
                data.kind.for_each_operand(|op| {
                    if let Some(reg) = regs.get(op) {
                        *scores.entry(reg.index()).or_insert(0) += weight;
                    }
                });

                // Call-argument registers are addressed by position at
                // the top of the frame; keep them where they are.
                if let InstrKind::Call { args, .. } | InstrKind::CallN { args, .. } =
                    &data.kind
                {
                    for &arg in args {
                        if matches!(
                            func.instr(arg).kind,
                            InstrKind::Mov(_) | InstrKind::ImplicitMov(_)
                        ) {
                            if let Some(reg) = regs.get(arg) {
                                pinned.insert(reg.index());
                            }
                        }
                    }
                }
            }
        }

        // Sort movable registers descending by (class, score, index).
        let mut movable: Vec<u32> = scores
            .keys()
            .copied()
            .filter(|r| !pinned.contains(r))
            .collect();
        movable.sort_by(|&a, &b| {
            let key_a = (classes.get(&a).copied().unwrap_or(0), scores[&a], a);
            let key_b = (classes.get(&b).copied().unwrap_or(0), scores[&b], b);
            key_b.cmp(&key_a)
        });

        // Hand the sorted registers the free indices, lowest first.
        let mut free_indices: Vec<u32> = (0..regs.frame_size())
            .filter(|i| !pinned.contains(i))
            .collect();
        free_indices.truncate(movable.len());

        let mut mapping: FxHashMap<u32, u32> = FxHashMap::default();
        for (rank, &reg) in movable.iter().enumerate() {
            let target = free_indices[rank];
            if target != reg {
                self.reordered += 1;
            }
            mapping.insert(reg, target);
        }

        if self.reordered == 0 {
            return false;
        }

        regs.remap(|r| {
            mapping
                .get(&r.index())
                .map(|&t| Register(t))
                .unwrap_or(r)
        });
        true
    }
}
