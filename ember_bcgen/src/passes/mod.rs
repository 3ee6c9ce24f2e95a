//! Register finalization passes.
//!
//! After the upstream allocator assigns registers, this pipeline refines
//! the assignment for the encoder:
//!
//! 1. **Move elimination**: fold single-use copies into their source
//! 2. **Cheap value recreation**: reload free literals instead of copying
//! 3. **Constant value numbering**: drop reloads of a register's current
//!    constant
//! 4. **Spill insertion**: rewrite registers that do not fit the short
//!    encodings through reserved scratch registers (mandatory)
//! 5. **Register reordering**: renumber registers so hot, numeric ones
//!    sit at low indices (only when nothing was spilled)
//!
//! Passes 1-3 and 5 only run when optimization is enabled.

pub mod const_numbering;
pub mod mov_elim;
pub mod recreate_cheap;
pub mod reorder;
pub mod spill;

pub use const_numbering::ConstantValueNumbering;
pub use mov_elim::MovElimination;
pub use recreate_cheap::RecreateCheapValues;
pub use reorder::ReorderRegisters;
pub use spill::SpillRegisters;

use crate::codegen::CodegenOptions;
use crate::ir::{Function, RegisterFile};

/// A single register finalization pass.
pub trait Pass {
    /// The name of this pass (for debugging).
    fn name(&self) -> &'static str;

    /// Run the pass. Returns true if anything changed.
    fn run(&mut self, func: &mut Function, regs: &mut RegisterFile) -> bool;
}

/// Counters from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Movs folded away by move elimination.
    pub movs_eliminated: u32,
    /// Movs turned back into literal loads.
    pub cheap_recreations: u32,
    /// Redundant constant reloads removed.
    pub reloads_removed: u32,
    /// Spill movs inserted.
    pub spill_movs_inserted: u32,
    /// Whether spilling rewrote anything.
    pub spilled: bool,
    /// Registers renumbered by reordering.
    pub registers_reordered: u32,
}

/// Run the finalization pipeline in its fixed order.
pub fn finalize_registers(
    func: &mut Function,
    regs: &mut RegisterFile,
    options: &CodegenOptions,
) -> PassStats {
    let mut stats = PassStats::default();

    if options.optimize {
        let mut mov_elim = MovElimination::new();
        mov_elim.run(func, regs);
        stats.movs_eliminated = mov_elim.eliminated();

        let mut recreate = RecreateCheapValues::new();
        recreate.run(func, regs);
        stats.cheap_recreations = recreate.recreated();

        let mut numbering = ConstantValueNumbering::new();
        numbering.run(func, regs);
        stats.reloads_removed = numbering.removed();
    }

    let mut spill = SpillRegisters::new();
    stats.spilled = spill.run(func, regs);
    stats.spill_movs_inserted = spill.movs_inserted();

    if options.optimize && !stats.spilled {
        let mut reorder = ReorderRegisters::new();
        reorder.run(func, regs);
        stats.registers_reordered = reorder.reordered();
    }

    stats
}
