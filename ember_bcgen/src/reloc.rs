//! Relocation records and the branch relaxation fixed point.
//!
//! The selector emits every branch in its long form and records a
//! relocation for each deferred operand, in strictly increasing stream
//! offset order. Relaxation then runs passes over the records: each pass
//! walks them in stream order with a running shift (bytes saved earlier
//! in that pass), re-resolves targets, and narrows any long jump whose
//! delta fits a signed byte. Short jumps are terminal; they are patched
//! but never grow back, so the loop converges after at most one pass per
//! long jump.

use crate::bytecode::stream::BytecodeBuilder;
use crate::bytecode::Opcode;
use crate::ir::{BlockId, InstrId};
use rustc_hash::FxHashMap;

/// What a deferred operand or marker means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// A narrowed jump; its 8-bit offset operand gets repatched.
    ShortJump,
    /// A wide jump; candidate for narrowing.
    LongJump,
    /// Marks the first byte of a basic block.
    BlockMarker,
    /// Marks a `Catch` instruction, anchoring handler coverage.
    CatchMarker,
    /// Marks an instruction with a pending debug location record.
    DebugMarker,
    /// Marks a `SwitchImm`; its default-target field gets patched.
    SwitchDispatch,
}

/// What a relocation refers to: always a stable handle, never a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    /// A basic block (jump targets, block markers).
    Block(BlockId),
    /// An instruction (catch sites, debug markers, switches).
    Instr(InstrId),
}

/// A deferred fixup in the instruction stream.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    /// Stream offset this record is anchored at.
    pub offset: u32,
    /// Fixup kind.
    pub kind: RelocKind,
    /// Referent handle.
    pub target: RelocTarget,
}

impl Relocation {
    /// The block this relocation points at; panics for instruction
    /// targets.
    pub fn block(&self) -> BlockId {
        match self.target {
            RelocTarget::Block(b) => b,
            RelocTarget::Instr(_) => panic!("relocation target is not a block"),
        }
    }

    /// The instruction this relocation points at; panics for block
    /// targets.
    pub fn instr(&self) -> InstrId {
        match self.target {
            RelocTarget::Instr(i) => i,
            RelocTarget::Block(_) => panic!("relocation target is not an instruction"),
        }
    }
}

/// Resolved block addresses plus each block's emission successor.
///
/// Exactly one entry exists per reachable block, and one sentinel records
/// the end-of-function offset.
#[derive(Debug, Default)]
pub struct BlockAddressMap {
    entries: FxHashMap<BlockId, (u32, Option<BlockId>)>,
    end_offset: u32,
}

impl BlockAddressMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a block at its initial offset.
    pub fn insert(&mut self, block: BlockId, offset: u32, next: Option<BlockId>) {
        let prev = self.entries.insert(block, (offset, next));
        debug_assert!(prev.is_none(), "block registered twice");
    }

    /// Update a block's offset after a relaxation shift.
    pub fn update_offset(&mut self, block: BlockId, offset: u32) {
        self.entries
            .get_mut(&block)
            .expect("block was registered during selection")
            .0 = offset;
    }

    /// The resolved address of a block.
    pub fn address_of(&self, block: BlockId) -> u32 {
        self.entries
            .get(&block)
            .expect("block was registered during selection")
            .0
    }

    /// The block emitted after `block`, or `None` for the last one.
    pub fn next_of(&self, block: BlockId) -> Option<BlockId> {
        self.entries
            .get(&block)
            .expect("block was registered during selection")
            .1
    }

    /// Whether a block was registered (i.e. was reachable).
    pub fn contains(&self, block: BlockId) -> bool {
        self.entries.contains_key(&block)
    }

    /// Record the end-of-function sentinel offset.
    pub fn set_end_offset(&mut self, offset: u32) {
        self.end_offset = offset;
    }

    /// The end-of-function sentinel offset.
    pub fn end_offset(&self) -> u32 {
        self.end_offset
    }
}

/// A staged dense-switch descriptor awaiting table materialization.
#[derive(Debug, Clone)]
pub struct SwitchDescriptor {
    /// Offset of the `SwitchImm` instruction, kept current by relaxation.
    pub offset: u32,
    /// Default target block.
    pub default: BlockId,
    /// Smallest case value.
    pub min: u32,
    /// Dense table: `table[v - min]` is the target for value `v`.
    pub table: Vec<BlockId>,
}

/// Counters from one relaxation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaxStats {
    /// Number of passes until the fixed point.
    pub passes: u32,
    /// Long jumps narrowed to short form.
    pub jumps_shrunk: u32,
}

/// Byte offset of a `SwitchImm`'s default-target field.
const SWITCH_DEFAULT_FIELD: u32 = 6;

/// Run the relaxation fixed point.
///
/// Resolves every relocation against the block address map, narrowing
/// long jumps as their deltas allow, until a full pass makes no change.
/// Block addresses, catch coverage offsets, and switch descriptor
/// offsets are final afterwards.
pub fn relax(
    builder: &mut BytecodeBuilder,
    relocations: &mut [Relocation],
    blocks: &mut BlockAddressMap,
    catch_offsets: &mut FxHashMap<InstrId, u32>,
    switches: &mut [SwitchDescriptor],
    switch_of: &FxHashMap<InstrId, usize>,
) -> RelaxStats {
    let mut stats = RelaxStats::default();

    loop {
        let mut changed = false;
        let mut total_shift: u32 = 0;
        stats.passes += 1;

        for reloc in relocations.iter_mut() {
            let loc = reloc.offset - total_shift;
            reloc.offset = loc;

            match reloc.kind {
                RelocKind::LongJump => {
                    let target = blocks.address_of(reloc.block());
                    let delta = target as i64 - loc as i64;
                    if (-128..128).contains(&delta) {
                        builder.shrink_jump(loc);
                        builder.update_jump_target(loc + 1, delta as i32, 1);
                        reloc.kind = RelocKind::ShortJump;
                        total_shift += Opcode::LONG_TO_SHORT_SAVINGS;
                        stats.jumps_shrunk += 1;
                        changed = true;
                    } else {
                        builder.update_jump_target(loc + 1, delta as i32, 4);
                    }
                }
                RelocKind::ShortJump => {
                    let target = blocks.address_of(reloc.block());
                    let delta = target as i64 - loc as i64;
                    debug_assert!(
                        (-128..128).contains(&delta),
                        "short jump delta {delta} regressed out of range"
                    );
                    builder.update_jump_target(loc + 1, delta as i32, 1);
                }
                RelocKind::BlockMarker => {
                    blocks.update_offset(reloc.block(), loc);
                }
                RelocKind::CatchMarker => {
                    catch_offsets.insert(reloc.instr(), loc);
                }
                RelocKind::DebugMarker => {
                    // Nothing to patch; the record itself now carries the
                    // shifted offset for the debug emitter.
                }
                RelocKind::SwitchDispatch => {
                    let index = switch_of[&reloc.instr()];
                    let descriptor = &mut switches[index];
                    let default_delta =
                        blocks.address_of(descriptor.default) as i64 - loc as i64;
                    builder.update_jump_target(
                        loc + SWITCH_DEFAULT_FIELD,
                        default_delta as i32,
                        4,
                    );
                    descriptor.offset = loc;
                }
            }
        }

        blocks.set_end_offset(blocks.end_offset() - total_shift);

        if !changed {
            break;
        }
    }

    stats
}
