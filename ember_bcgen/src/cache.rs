//! Inline cache slot allocation for property access sites.
//!
//! Every by-id property access gets an 8-bit cache slot the interpreter
//! uses to memoize the receiver shape. Slot 0 is the "no cache" sentinel.
//! Reads and writes draw from independent counters. When a counter
//! saturates at 255 further sites silently run uncached; that is a
//! degradation, never an error.

use crate::ir::StringId;
use rustc_hash::FxHashMap;

/// Sentinel slot meaning "property caching disabled for this site".
pub const PROPERTY_CACHING_DISABLED: u8 = 0;

/// Counters describing cache allocation for one function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Sites that received a cache slot.
    pub cached_sites: u32,
    /// Sites that ran uncached because a counter saturated.
    pub uncached_sites: u32,
    /// Distinct slots handed out.
    pub slots_allocated: u32,
}

/// Allocates property cache slots for one function compilation.
#[derive(Debug)]
pub struct PropertyCacheAllocator {
    reuse: bool,
    last_read_index: u8,
    last_write_index: u8,
    read_slot_for_id: FxHashMap<StringId, u8>,
    write_slot_for_id: FxHashMap<StringId, u8>,
    stats: CacheStats,
}

impl PropertyCacheAllocator {
    /// Create an allocator. With `reuse` enabled, repeated accesses to the
    /// same identifier share one slot.
    pub fn new(reuse: bool) -> Self {
        Self {
            reuse,
            last_read_index: 0,
            last_write_index: 0,
            read_slot_for_id: FxHashMap::default(),
            write_slot_for_id: FxHashMap::default(),
            stats: CacheStats::default(),
        }
    }

    /// Acquire a read-cache slot for a property identifier.
    pub fn acquire_read(&mut self, id: StringId) -> u8 {
        Self::acquire(
            self.reuse,
            id,
            &mut self.read_slot_for_id,
            &mut self.last_read_index,
            &mut self.stats,
        )
    }

    /// Acquire a write-cache slot for a property identifier.
    pub fn acquire_write(&mut self, id: StringId) -> u8 {
        Self::acquire(
            self.reuse,
            id,
            &mut self.write_slot_for_id,
            &mut self.last_write_index,
            &mut self.stats,
        )
    }

    fn acquire(
        reuse: bool,
        id: StringId,
        slot_for_id: &mut FxHashMap<StringId, u8>,
        last_index: &mut u8,
        stats: &mut CacheStats,
    ) -> u8 {
        if reuse {
            if let Some(&slot) = slot_for_id.get(&id) {
                stats.cached_sites += 1;
                return slot;
            }
        }

        if *last_index == u8::MAX {
            stats.uncached_sites += 1;
            return PROPERTY_CACHING_DISABLED;
        }

        *last_index += 1;
        let slot = *last_index;
        if reuse {
            slot_for_id.insert(id, slot);
        }
        stats.cached_sites += 1;
        stats.slots_allocated += 1;
        slot
    }

    /// Highest read slot handed out (0 when none).
    #[inline]
    pub fn highest_read_index(&self) -> u8 {
        self.last_read_index
    }

    /// Highest write slot handed out (0 when none).
    #[inline]
    pub fn highest_write_index(&self) -> u8 {
        self.last_write_index
    }

    /// Allocation counters.
    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}
