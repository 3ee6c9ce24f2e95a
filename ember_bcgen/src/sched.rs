//! Basic block emission scheduling.
//!
//! Blocks are emitted in reverse-post-order, a topological sort of the
//! reachable control flow graph. Every block also knows which block is
//! emitted immediately after it; branch emission elides a jump whenever
//! its target is that "next" block. Unreachable blocks never appear in
//! the order and are silently dropped.

use crate::ir::{BlockId, Function};

/// A linearized emission order over the reachable blocks of a function.
#[derive(Debug)]
pub struct Schedule {
    /// Blocks in emission (reverse-post) order; the entry block is first.
    pub order: Vec<BlockId>,
    /// `next[position_of(b)]`, indexed by arena block id.
    next: Vec<Option<BlockId>>,
    position: Vec<Option<u32>>,
}

impl Schedule {
    /// Compute the emission order for a function.
    pub fn compute(func: &Function) -> Schedule {
        let block_count = func.block_count();
        let mut visited = vec![false; block_count];
        let mut post_order = Vec::with_capacity(block_count);

        // Iterative DFS; each stack entry is (block, next successor index).
        let mut stack: Vec<(BlockId, usize)> = vec![(func.entry, 0)];
        visited[func.entry.0 as usize] = true;

        while let Some(&(block, idx)) = stack.last() {
            let succs = func
                .block(block)
                .terminator()
                .map(|t| func.instr(t).kind.successors())
                .unwrap_or_default();
            if idx < succs.len() {
                stack.last_mut().expect("stack is non-empty").1 += 1;
                let succ = succs[idx];
                if !visited[succ.0 as usize] {
                    visited[succ.0 as usize] = true;
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(block);
                stack.pop();
            }
        }

        let mut order = post_order;
        order.reverse();

        let mut next = vec![None; block_count];
        let mut position = vec![None; block_count];
        for (i, &b) in order.iter().enumerate() {
            position[b.0 as usize] = Some(i as u32);
            next[b.0 as usize] = order.get(i + 1).copied();
        }

        Schedule {
            order,
            next,
            position,
        }
    }

    /// The block emitted immediately after `block`, or `None` for the
    /// last block.
    #[inline]
    pub fn next_of(&self, block: BlockId) -> Option<BlockId> {
        self.next[block.0 as usize]
    }

    /// Whether `block` is reachable (appears in the order).
    #[inline]
    pub fn is_scheduled(&self, block: BlockId) -> bool {
        self.position[block.0 as usize].is_some()
    }

    /// Position of a reachable block in the emission order.
    #[inline]
    pub fn position_of(&self, block: BlockId) -> Option<u32> {
        self.position[block.0 as usize]
    }
}
