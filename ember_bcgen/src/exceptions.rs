//! Exception handler table construction.
//!
//! Try regions arrive from the upstream pipeline with their nesting
//! already resolved; this builder only turns them into address triples
//! once relaxation has fixed every block address. A region covers from
//! its first block up to the block that lexically follows it (or the end
//! of the function), and routes to the `Catch` instruction of its
//! handler block.

use crate::bytecode::ExceptionHandlerEntry;
use crate::ir::{Function, InstrId, InstrKind};
use crate::reloc::BlockAddressMap;
use rustc_hash::FxHashMap;

/// Build the exception table for a function with resolved addresses.
///
/// Entries come out in region order, one per try region; they are
/// immutable once built.
pub fn build_exception_table(
    func: &Function,
    blocks: &BlockAddressMap,
    catch_offsets: &FxHashMap<InstrId, u32>,
) -> Vec<ExceptionHandlerEntry> {
    let mut table = Vec::with_capacity(func.try_regions.len());

    for region in &func.try_regions {
        let start = blocks.address_of(region.first);
        let end = match region.past_end {
            Some(block) => blocks.address_of(block),
            None => blocks.end_offset(),
        };

        let catch_instr = func
            .block(region.catch_block)
            .instrs
            .iter()
            .copied()
            .find(|&id| matches!(func.instr(id).kind, InstrKind::Catch))
            .expect("handler block starts with a Catch instruction");
        let handler = *catch_offsets
            .get(&catch_instr)
            .expect("catch site was registered during selection");

        table.push(ExceptionHandlerEntry {
            start,
            end,
            handler,
        });
    }

    table
}
