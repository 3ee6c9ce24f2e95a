//! Dominance and natural-loop analysis over the scheduled CFG.
//!
//! The register reorder pass weighs register activity by loop depth, so
//! it needs to know how deeply nested in loops each block is. Loop
//! membership is derived from dominance: an edge `latch -> header` whose
//! target dominates its source is a back edge, and the natural loop of
//! that edge is everything that reaches the latch without passing through
//! the header. Results are computed once per function and cached in a
//! [`LoopInfo`].

use crate::ir::{BlockId, Function};
use crate::sched::Schedule;

/// Cached per-block loop depths for one function.
#[derive(Debug)]
pub struct LoopInfo {
    depth: Vec<u32>,
}

impl LoopInfo {
    /// Compute loop depths for every scheduled block.
    pub fn compute(func: &Function, sched: &Schedule) -> LoopInfo {
        let block_count = func.block_count();
        let preds = predecessors(func, sched);
        let idom = dominators(func, sched, &preds);

        let mut depth = vec![0u32; block_count];

        // Walk the idom chain to decide whether `a` dominates `b`.
        let dominates = |a: BlockId, b: BlockId| -> bool {
            let mut cur = b;
            loop {
                if cur == a {
                    return true;
                }
                match idom[cur.0 as usize] {
                    Some(parent) if parent != cur => cur = parent,
                    _ => return false,
                }
            }
        };

        for &block in &sched.order {
            if let Some(term) = func.block(block).terminator() {
                func.instr(term).kind.for_each_successor(|header| {
                    if !sched.is_scheduled(header) || !dominates(header, block) {
                        return;
                    }
                    // Natural loop of the back edge block -> header:
                    // everything reaching the latch without crossing the
                    // header.
                    let mut in_loop = vec![false; block_count];
                    in_loop[header.0 as usize] = true;
                    let mut worklist = Vec::new();
                    if !in_loop[block.0 as usize] {
                        in_loop[block.0 as usize] = true;
                        worklist.push(block);
                    }
                    while let Some(b) = worklist.pop() {
                        for &p in &preds[b.0 as usize] {
                            if !in_loop[p.0 as usize] {
                                in_loop[p.0 as usize] = true;
                                worklist.push(p);
                            }
                        }
                    }
                    for (i, &inside) in in_loop.iter().enumerate() {
                        if inside {
                            depth[i] += 1;
                        }
                    }
                });
            }
        }

        LoopInfo { depth }
    }

    /// Loop nesting depth of a block; 0 outside any loop.
    #[inline]
    pub fn depth_of(&self, block: BlockId) -> u32 {
        self.depth[block.0 as usize]
    }
}

/// Predecessor lists restricted to scheduled (reachable) blocks.
fn predecessors(func: &Function, sched: &Schedule) -> Vec<Vec<BlockId>> {
    let mut preds = vec![Vec::new(); func.block_count()];
    for &block in &sched.order {
        if let Some(term) = func.block(block).terminator() {
            func.instr(term).kind.for_each_successor(|succ| {
                if sched.is_scheduled(succ) {
                    preds[succ.0 as usize].push(block);
                }
            });
        }
    }
    preds
}

/// Immediate dominators via forward data-flow over the emission order
/// (which is a reverse post-order).
fn dominators(func: &Function, sched: &Schedule, preds: &[Vec<BlockId>]) -> Vec<Option<BlockId>> {
    let mut idom: Vec<Option<BlockId>> = vec![None; func.block_count()];
    idom[func.entry.0 as usize] = Some(func.entry);

    let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| -> BlockId {
        let pos = |x: BlockId| sched.position_of(x).expect("block is scheduled");
        while a != b {
            while pos(a) > pos(b) {
                a = idom[a.0 as usize].expect("processed block has an idom");
            }
            while pos(b) > pos(a) {
                b = idom[b.0 as usize].expect("processed block has an idom");
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &block in sched.order.iter().skip(1) {
            let mut new_idom: Option<BlockId> = None;
            for &p in &preds[block.0 as usize] {
                if idom[p.0 as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, cur, p),
                });
            }
            if new_idom.is_some() && idom[block.0 as usize] != new_idom {
                idom[block.0 as usize] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, Literal, Type};

    fn ret_null(f: &mut Function, b: BlockId) {
        let v = f.add_instr(b, InstrKind::LoadConst(Literal::Null), Type::Null, None);
        f.add_instr(b, InstrKind::Ret(v), Type::Any, None);
    }

    #[test]
    fn test_no_loops() {
        let mut f = Function::new("t", 0);
        let b1 = f.add_block();
        f.add_instr(f.entry, InstrKind::Branch { target: b1 }, Type::Any, None);
        ret_null(&mut f, b1);

        let sched = Schedule::compute(&f);
        let loops = LoopInfo::compute(&f, &sched);
        assert_eq!(loops.depth_of(f.entry), 0);
        assert_eq!(loops.depth_of(b1), 0);
    }

    #[test]
    fn test_single_loop() {
        let mut f = Function::new("t", 0);
        let header = f.add_block();
        let body = f.add_block();
        let exit = f.add_block();

        f.add_instr(f.entry, InstrKind::Branch { target: header }, Type::Any, None);
        let c = f.add_instr(header, InstrKind::LoadParam(0), Type::Any, None);
        f.add_instr(
            header,
            InstrKind::CondBranch {
                cond: c,
                on_true: body,
                on_false: exit,
            },
            Type::Any,
            None,
        );
        f.add_instr(body, InstrKind::Branch { target: header }, Type::Any, None);
        ret_null(&mut f, exit);

        let sched = Schedule::compute(&f);
        let loops = LoopInfo::compute(&f, &sched);
        assert_eq!(loops.depth_of(f.entry), 0);
        assert_eq!(loops.depth_of(header), 1);
        assert_eq!(loops.depth_of(body), 1);
        assert_eq!(loops.depth_of(exit), 0);
    }

    #[test]
    fn test_nested_loops() {
        let mut f = Function::new("t", 0);
        let outer = f.add_block();
        let inner = f.add_block();
        let inner_body = f.add_block();
        let exit = f.add_block();

        f.add_instr(f.entry, InstrKind::Branch { target: outer }, Type::Any, None);
        let c1 = f.add_instr(outer, InstrKind::LoadParam(0), Type::Any, None);
        f.add_instr(
            outer,
            InstrKind::CondBranch {
                cond: c1,
                on_true: inner,
                on_false: exit,
            },
            Type::Any,
            None,
        );
        let c2 = f.add_instr(inner, InstrKind::LoadParam(1), Type::Any, None);
        f.add_instr(
            inner,
            InstrKind::CondBranch {
                cond: c2,
                on_true: inner_body,
                on_false: outer,
            },
            Type::Any,
            None,
        );
        f.add_instr(inner_body, InstrKind::Branch { target: inner }, Type::Any, None);
        ret_null(&mut f, exit);

        let sched = Schedule::compute(&f);
        let loops = LoopInfo::compute(&f, &sched);
        assert_eq!(loops.depth_of(f.entry), 0);
        assert_eq!(loops.depth_of(outer), 1);
        assert_eq!(loops.depth_of(inner), 2);
        assert_eq!(loops.depth_of(inner_body), 2);
        assert_eq!(loops.depth_of(exit), 0);
    }

    #[test]
    fn test_self_loop() {
        let mut f = Function::new("t", 0);
        let spin = f.add_block();
        let exit = f.add_block();
        f.add_instr(f.entry, InstrKind::Branch { target: spin }, Type::Any, None);
        let c = f.add_instr(spin, InstrKind::LoadParam(0), Type::Any, None);
        f.add_instr(
            spin,
            InstrKind::CondBranch {
                cond: c,
                on_true: spin,
                on_false: exit,
            },
            Type::Any,
            None,
        );
        ret_null(&mut f, exit);

        let sched = Schedule::compute(&f);
        let loops = LoopInfo::compute(&f, &sched);
        assert_eq!(loops.depth_of(spin), 1);
        assert_eq!(loops.depth_of(exit), 0);
    }
}
