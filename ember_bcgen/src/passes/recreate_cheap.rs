//! Cheap value recreation.
//!
//! Copying a register that holds `undefined`, `null`, a boolean, or
//! positive zero costs the same as reloading the literal, and reloading
//! frees the source register earlier. Each such `Mov` is rewritten into
//! a fresh literal load in the mov's own register; the original load is
//! deleted once nothing uses it.

use super::Pass;
use crate::ir::{Function, InstrId, InstrKind, RegisterFile};
use rustc_hash::FxHashSet;

/// The cheap value recreation pass.
#[derive(Debug, Default)]
pub struct RecreateCheapValues {
    recreated: u32,
    loads_removed: u32,
}

impl RecreateCheapValues {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Movs rewritten into literal loads in the last run.
    pub fn recreated(&self) -> u32 {
        self.recreated
    }

    /// Original loads that became dead and were removed.
    pub fn loads_removed(&self) -> u32 {
        self.loads_removed
    }
}

impl Pass for RecreateCheapValues {
    fn name(&self) -> &'static str {
        "recreate-cheap-values"
    }

    fn run(&mut self, func: &mut Function, _regs: &mut RegisterFile) -> bool {
        let mut potentially_unused: FxHashSet<InstrId> = FxHashSet::default();

        for index in 0..func.instr_count() {
            let id = InstrId(index as u32);
            let InstrKind::Mov(src) = func.instr(id).kind else {
                continue;
            };
            let InstrKind::LoadConst(literal) = func.instr(src).kind else {
                continue;
            };
            if !literal.is_cheap() {
                continue;
            }

            // The mov keeps its handle and register; only its meaning
            // changes from "copy" to "reload".
            let data = func.instr_mut(id);
            data.kind = InstrKind::LoadConst(literal);
            data.ty = literal.type_of();
            potentially_unused.insert(src);
            self.recreated += 1;
        }

        if self.recreated == 0 {
            return false;
        }

        let use_counts = func.use_counts();
        let dead: FxHashSet<InstrId> = potentially_unused
            .into_iter()
            .filter(|id| use_counts[id.0 as usize] == 0)
            .collect();
        self.loads_removed = dead.len() as u32;
        func.purge_instrs(&dead);
        true
    }
}
