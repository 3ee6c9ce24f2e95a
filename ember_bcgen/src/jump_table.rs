//! Switch dispatch table materialization.
//!
//! After relaxation fixes every address, each staged switch descriptor
//! becomes a run of slots in one flat table. A slot holds the distance
//! from the switch instruction to the case target (two's complement, so
//! backward targets wrap). Descriptors are processed in instruction
//! offset order so the table layout is deterministic, and each
//! `SwitchImm`'s table-start field is patched to its run.

use crate::bytecode::stream::BytecodeBuilder;
use crate::reloc::{BlockAddressMap, SwitchDescriptor};

/// Byte offset of a `SwitchImm`'s table-start field.
const SWITCH_TABLE_FIELD: u32 = 2;

/// Build the flat jump table and patch every switch's table-start field.
pub fn build_jump_table(
    builder: &mut BytecodeBuilder,
    switches: &mut [SwitchDescriptor],
    blocks: &BlockAddressMap,
) -> Vec<u32> {
    if switches.is_empty() {
        return Vec::new();
    }

    switches.sort_by_key(|d| d.offset);

    let mut table = Vec::new();
    for descriptor in switches.iter() {
        let start = table.len() as u32;
        for &target in &descriptor.table {
            let delta = blocks.address_of(target) as i64 - descriptor.offset as i64;
            table.push(delta as i32 as u32);
        }
        builder.update_jump_table_offset(descriptor.offset + SWITCH_TABLE_FIELD, start);
    }

    builder.set_jump_table(table.clone());
    table
}
