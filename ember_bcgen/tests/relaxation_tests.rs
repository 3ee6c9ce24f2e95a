//! Branch relaxation tests: immediate exactness, short-form boundaries,
//! and fixed-point convergence over generated control flow.

use ember_bcgen::bytecode::decode_at;
use ember_bcgen::ir::{Function, InstrKind, Literal, Register, RegisterFile, Type};
use ember_bcgen::isel::{SelectionOutput, Selector};
use ember_bcgen::reloc::{relax, RelaxStats, RelocKind};
use ember_bcgen::{CodegenOptions, Schedule};
use ember_core::Diagnostics;

// =============================================================================
// Test Helpers
// =============================================================================

/// Select and relax a function, returning the relaxed output and stats.
fn lower(func: &Function, regs: &RegisterFile) -> (SelectionOutput, RelaxStats) {
    let sched = Schedule::compute(func);
    let options = CodegenOptions::default();
    let mut diagnostics = Diagnostics::new();
    let mut out = Selector::new(func, regs, &options, &mut diagnostics)
        .run(&sched)
        .expect("selection succeeds");
    let stats = relax(
        &mut out.builder,
        &mut out.relocations,
        &mut out.blocks,
        &mut out.catch_offsets,
        &mut out.switches,
        &out.switch_of,
    );
    (out, stats)
}

/// Check that every resolved jump's immediate lands exactly on its
/// target block.
fn assert_jumps_exact(out: &SelectionOutput) {
    let bytes = out.builder.bytes();
    let mut jumps = 0;
    for reloc in &out.relocations {
        if !matches!(reloc.kind, RelocKind::ShortJump | RelocKind::LongJump) {
            continue;
        }
        jumps += 1;
        let instr = decode_at(bytes, reloc.offset).expect("valid jump encoding");
        assert!(instr.opcode.is_jump());
        let target = out.blocks.address_of(reloc.block());
        assert_eq!(
            instr.jump_offset() as i64,
            target as i64 - reloc.offset as i64,
            "jump at {} must land on block at {}",
            reloc.offset,
            target
        );
    }
    assert!(jumps > 0, "fixture produced no jumps");
}

/// entry conditionally branches over `pad` one-byte instructions to a
/// far block; the false side falls through the padding.
fn forward_jump_fixture(pad: u32) -> (Function, RegisterFile) {
    let mut f = Function::new("fwd", 0);
    let mut regs = RegisterFile::new();
    let mid = f.add_block();
    let far = f.add_block();

    let c = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Any, None);
    f.add_instr(
        f.entry,
        InstrKind::CondBranch {
            cond: c,
            on_true: far,
            on_false: mid,
        },
        Type::Any,
        None,
    );
    for _ in 0..pad {
        f.add_instr(mid, InstrKind::Debugger, Type::Any, None);
    }
    f.add_instr(mid, InstrKind::Branch { target: far }, Type::Any, None);
    let v = f.add_instr(far, InstrKind::LoadConst(Literal::Undefined), Type::Undefined, None);
    f.add_instr(far, InstrKind::Ret(v), Type::Any, None);

    regs.assign(c, Register(0));
    regs.assign(v, Register(1));
    (f, regs)
}

/// A single self-looping block with `pad` one-byte instructions before
/// its backward jump.
fn backward_jump_fixture(pad: u32) -> (Function, RegisterFile) {
    let mut f = Function::new("back", 0);
    let regs = RegisterFile::new();
    let header = f.add_block();
    f.add_instr(f.entry, InstrKind::Branch { target: header }, Type::Any, None);
    for _ in 0..pad {
        f.add_instr(header, InstrKind::Debugger, Type::Any, None);
    }
    f.add_instr(header, InstrKind::Branch { target: header }, Type::Any, None);
    (f, regs)
}

// =============================================================================
// A. Immediate exactness
// =============================================================================

#[test]
fn test_forward_jump_immediates_exact() {
    for pad in [0, 1, 50, 120, 125, 130, 200, 1000] {
        let (f, regs) = forward_jump_fixture(pad);
        let (out, _) = lower(&f, &regs);
        assert_jumps_exact(&out);
    }
}

#[test]
fn test_backward_jump_immediates_exact() {
    for pad in [0, 1, 50, 126, 127, 128, 129, 500] {
        let (f, regs) = backward_jump_fixture(pad);
        let (out, _) = lower(&f, &regs);
        assert_jumps_exact(&out);
    }
}

#[test]
fn test_branch_chain_immediates_exact() {
    // A chain of blocks, each conditionally skipping to the end, with
    // block sizes straddling the short-form boundary.
    for pad in [1, 20, 40, 60, 130] {
        let mut f = Function::new("chain", 0);
        let mut regs = RegisterFile::new();
        let c = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Any, None);
        regs.assign(c, Register(0));

        let blocks: Vec<_> = (0..6).map(|_| f.add_block()).collect();
        let end = f.add_block();
        f.add_instr(f.entry, InstrKind::Branch { target: blocks[0] }, Type::Any, None);
        for (i, &b) in blocks.iter().enumerate() {
            for _ in 0..pad {
                f.add_instr(b, InstrKind::Debugger, Type::Any, None);
            }
            let fall = blocks.get(i + 1).copied().unwrap_or(end);
            f.add_instr(
                b,
                InstrKind::CondBranch {
                    cond: c,
                    on_true: end,
                    on_false: fall,
                },
                Type::Any,
                None,
            );
        }
        let v = f.add_instr(end, InstrKind::LoadConst(Literal::Null), Type::Null, None);
        f.add_instr(end, InstrKind::Ret(v), Type::Any, None);
        regs.assign(v, Register(1));

        let (out, _) = lower(&f, &regs);
        assert_jumps_exact(&out);
    }
}

// =============================================================================
// B. Short-form boundary
// =============================================================================

/// Forward deltas at the decision point: the conditional jump sits at
/// offset 3 and initially spans 6 (its own long form) + pad bytes.
#[test]
fn test_forward_boundary_picks_short_iff_in_range() {
    // Initial delta = 6 + pad. 121 -> 127 (short), 122 -> 128 (long).
    let (f, regs) = forward_jump_fixture(121);
    let (out, stats) = lower(&f, &regs);
    assert_eq!(stats.jumps_shrunk, 1);
    assert_eq!(out.relocations.iter().filter(|r| r.kind == RelocKind::ShortJump).count(), 1);
    assert_jumps_exact(&out);

    let (f, regs) = forward_jump_fixture(122);
    let (out, stats) = lower(&f, &regs);
    assert_eq!(stats.jumps_shrunk, 0);
    assert_eq!(out.relocations.iter().filter(|r| r.kind == RelocKind::LongJump).count(), 1);
    assert_jumps_exact(&out);
}

#[test]
fn test_backward_boundary_picks_short_iff_in_range() {
    // The backward jump's delta is exactly -pad.
    let (f, regs) = backward_jump_fixture(128);
    let (out, stats) = lower(&f, &regs);
    assert_eq!(stats.jumps_shrunk, 1);
    let short = out
        .relocations
        .iter()
        .find(|r| r.kind == RelocKind::ShortJump)
        .expect("jump was narrowed");
    let instr = decode_at(out.builder.bytes(), short.offset).unwrap();
    assert_eq!(instr.jump_offset(), -128);

    let (f, regs) = backward_jump_fixture(129);
    let (out, stats) = lower(&f, &regs);
    assert_eq!(stats.jumps_shrunk, 0);
    let long = out
        .relocations
        .iter()
        .find(|r| r.kind == RelocKind::LongJump)
        .expect("jump stayed long");
    let instr = decode_at(out.builder.bytes(), long.offset).unwrap();
    assert_eq!(instr.jump_offset(), -129);
}

// =============================================================================
// C. Fixed point behavior
// =============================================================================

#[test]
fn test_relaxation_is_idempotent() {
    let (f, regs) = forward_jump_fixture(50);
    let (mut out, first) = lower(&f, &regs);
    assert!(first.jumps_shrunk > 0);

    let again = relax(
        &mut out.builder,
        &mut out.relocations,
        &mut out.blocks,
        &mut out.catch_offsets,
        &mut out.switches,
        &out.switch_of,
    );
    assert_eq!(again.jumps_shrunk, 0);
    assert_eq!(again.passes, 1);
    assert_jumps_exact(&out);
}

#[test]
fn test_cascading_shrinks_converge() {
    // Two jumps to the same far block. The later one is trivially
    // short; narrowing it pulls the earlier one's delta from 129 down
    // to 126, so the earlier one only narrows on the second pass.
    let mut f = Function::new("cascade", 0);
    let mut regs = RegisterFile::new();
    let mid_a = f.add_block();
    let mid_b = f.add_block();
    let far = f.add_block();

    let c = f.add_instr(f.entry, InstrKind::LoadParam(0), Type::Any, None);
    f.add_instr(
        f.entry,
        InstrKind::CondBranch { cond: c, on_true: far, on_false: mid_a },
        Type::Any,
        None,
    );
    for _ in 0..117 {
        f.add_instr(mid_a, InstrKind::Debugger, Type::Any, None);
    }
    f.add_instr(
        mid_a,
        InstrKind::CondBranch { cond: c, on_true: far, on_false: mid_b },
        Type::Any,
        None,
    );
    f.add_instr(mid_b, InstrKind::Branch { target: far }, Type::Any, None);
    let v = f.add_instr(far, InstrKind::LoadConst(Literal::Null), Type::Null, None);
    f.add_instr(far, InstrKind::Ret(v), Type::Any, None);
    regs.assign(c, Register(0));
    regs.assign(v, Register(1));

    let (out, stats) = lower(&f, &regs);
    assert_eq!(stats.jumps_shrunk, 2);
    assert_eq!(stats.passes, 3);
    assert_jumps_exact(&out);
}

#[test]
fn test_block_addresses_consistent_after_relaxation() {
    let (f, regs) = forward_jump_fixture(100);
    let (out, _) = lower(&f, &regs);

    // Block markers resolve inside the stream, in emission order, and
    // the end sentinel matches the stream length.
    let mut last = 0;
    for reloc in &out.relocations {
        if reloc.kind == RelocKind::BlockMarker {
            let addr = out.blocks.address_of(reloc.block());
            assert!(addr >= last);
            assert!(addr <= out.builder.current_offset());
            last = addr;
        }
    }
    assert_eq!(out.blocks.end_offset(), out.builder.current_offset());
}
