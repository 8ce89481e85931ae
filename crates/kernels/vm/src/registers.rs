//! Chunk-local register file.
//!
//! One contiguous, 64-byte aligned allocation holds every temporary register
//! of a batch:
//!
//! ```text
//! ┌──────────── register 0 ────────────┬──────────── register 1 ──── ...
//! │ block 0 │ block 1 │ ... │ block B-1 │ block 0 │ ...
//! └─────────┴─────────┴─────┴───────────┴─────────┴──── ...
//!   4 lanes   4 lanes         padding
//! ```
//!
//! `B = blocks_per_register` is rounded up to whole cache lines, so every
//! register starts on a [`SIMD_ALIGNMENT`] boundary and kernels can always
//! process whole lane blocks. Lanes past a chunk's instance count hold
//! leftover values and are never written to outputs.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::lanes::{LANE_WIDTH, LaneBlock};

/// Alignment of the register file (64 bytes = cache line).
pub const SIMD_ALIGNMENT: usize = 64;

const BLOCKS_PER_LINE: usize = SIMD_ALIGNMENT / std::mem::size_of::<LaneBlock>();

/// Aligned storage for a batch's temporary registers.
pub struct RegisterFile {
    /// Start of the allocation (None while nothing is allocated).
    ptr: Option<NonNull<LaneBlock>>,
    /// Allocated blocks.
    capacity_blocks: usize,
    num_registers: usize,
    blocks_per_register: usize,
}

impl RegisterFile {
    /// Empty register file; call [`resize`](Self::resize) before use.
    pub fn new() -> Self {
        Self {
            ptr: None,
            capacity_blocks: 0,
            num_registers: 0,
            blocks_per_register: 0,
        }
    }

    /// Lane blocks needed per register for chunks of `max_instances`.
    #[inline]
    pub fn blocks_for(max_instances: usize) -> usize {
        max_instances
            .div_ceil(LANE_WIDTH)
            .next_multiple_of(BLOCKS_PER_LINE)
    }

    /// Size the file for `num_registers` registers of `max_instances` lanes.
    ///
    /// Reuses the existing allocation when it is large enough. Contents are
    /// unspecified afterwards.
    ///
    /// # Panics
    ///
    /// If the requested size overflows `isize`.
    pub fn resize(&mut self, num_registers: usize, max_instances: usize) {
        let blocks_per_register = Self::blocks_for(max_instances);
        let required = num_registers * blocks_per_register;
        if required > self.capacity_blocks {
            self.release();
            let layout = Self::layout(required);
            // SAFETY: layout has non-zero size since required > capacity >= 0
            let raw = unsafe { alloc::alloc_zeroed(layout) };
            let Some(ptr) = NonNull::new(raw.cast::<LaneBlock>()) else {
                alloc::handle_alloc_error(layout);
            };
            self.ptr = Some(ptr);
            self.capacity_blocks = required;
        }
        self.num_registers = num_registers;
        self.blocks_per_register = blocks_per_register;
    }

    /// Registers in the file.
    #[inline]
    pub fn num_registers(&self) -> usize {
        self.num_registers
    }

    /// Lane blocks in each register.
    #[inline]
    pub fn blocks_per_register(&self) -> usize {
        self.blocks_per_register
    }

    /// Lane block `index` of `register`.
    #[inline]
    pub fn block(&self, register: u16, index: usize) -> LaneBlock {
        self.register(register)[index]
    }

    /// Overwrite lane block `index` of `register`.
    #[inline]
    pub fn store(&mut self, register: u16, index: usize, block: LaneBlock) {
        self.register_mut(register)[index] = block;
    }

    /// Scalar lane `lane` of `register`.
    #[inline]
    pub fn lane(&self, register: u16, lane: usize) -> u32 {
        self.register(register)[lane / LANE_WIDTH].0[lane % LANE_WIDTH]
    }

    /// Overwrite scalar lane `lane` of `register`.
    #[inline]
    pub fn set_lane(&mut self, register: u16, lane: usize, bits: u32) {
        self.register_mut(register)[lane / LANE_WIDTH].0[lane % LANE_WIDTH] = bits;
    }

    /// All blocks of `register`.
    #[inline]
    pub fn register(&self, register: u16) -> &[LaneBlock] {
        let start = register as usize * self.blocks_per_register;
        &self.as_slice()[start..start + self.blocks_per_register]
    }

    /// All blocks of `register`, mutably.
    #[inline]
    pub fn register_mut(&mut self, register: u16) -> &mut [LaneBlock] {
        let start = register as usize * self.blocks_per_register;
        let blocks = self.blocks_per_register;
        &mut self.as_mut_slice()[start..start + blocks]
    }

    fn used_blocks(&self) -> usize {
        self.num_registers * self.blocks_per_register
    }

    fn as_slice(&self) -> &[LaneBlock] {
        match self.ptr {
            // SAFETY: ptr owns capacity_blocks >= used_blocks initialized blocks
            Some(ptr) => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.used_blocks()) },
            None => &[],
        }
    }

    fn as_mut_slice(&mut self) -> &mut [LaneBlock] {
        match self.ptr {
            // SAFETY: as above, and &mut self guarantees exclusive access
            Some(ptr) => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), self.used_blocks())
            },
            None => &mut [],
        }
    }

    fn layout(blocks: usize) -> Layout {
        Layout::array::<LaneBlock>(blocks)
            .and_then(|layout| layout.align_to(SIMD_ALIGNMENT))
            .unwrap_or_else(|_| panic!("register file of {blocks} blocks overflows isize"))
    }

    fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: ptr was allocated with the layout of capacity_blocks
            unsafe { alloc::dealloc(ptr.as_ptr().cast(), Self::layout(self.capacity_blocks)) };
        }
        self.capacity_blocks = 0;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("num_registers", &self.num_registers)
            .field("blocks_per_register", &self.blocks_per_register)
            .field("capacity_blocks", &self.capacity_blocks)
            .finish()
    }
}

impl Drop for RegisterFile {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: RegisterFile owns its allocation outright and hands out
// references only through &self / &mut self.
unsafe impl Send for RegisterFile {}

// SAFETY: shared access only reads.
unsafe impl Sync for RegisterFile {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_are_padded_to_cache_lines() {
        assert_eq!(RegisterFile::blocks_for(1), 4);
        assert_eq!(RegisterFile::blocks_for(16), 4);
        assert_eq!(RegisterFile::blocks_for(17), 8);
        assert_eq!(RegisterFile::blocks_for(128), 32);
        assert_eq!(RegisterFile::blocks_for(0), 0);
    }

    #[test]
    fn every_register_starts_aligned() {
        let mut file = RegisterFile::new();
        file.resize(3, 10);
        for register in 0..3 {
            let address = file.register(register).as_ptr() as usize;
            assert_eq!(address % SIMD_ALIGNMENT, 0);
        }
    }

    #[test]
    fn registers_do_not_alias() {
        let mut file = RegisterFile::new();
        file.resize(2, 8);
        file.store(0, 1, LaneBlock::splat(7));
        file.set_lane(1, 5, 9);
        assert_eq!(file.block(0, 1), LaneBlock::splat(7));
        assert_eq!(file.lane(1, 5), 9);
        assert_eq!(file.lane(0, 5), 7);
        assert_eq!(file.block(1, 0), LaneBlock::ZERO);
    }

    #[test]
    fn resize_reuses_a_large_enough_allocation() {
        let mut file = RegisterFile::new();
        file.resize(4, 64);
        let before = file.register(0).as_ptr();
        file.resize(2, 16);
        assert_eq!(file.register(0).as_ptr(), before);
        assert_eq!(file.num_registers(), 2);
        assert_eq!(file.blocks_per_register(), 4);
    }

    #[test]
    fn zero_registers_allocate_nothing() {
        let mut file = RegisterFile::new();
        file.resize(0, 128);
        assert_eq!(file.num_registers(), 0);
        assert!(format!("{file:?}").contains("capacity_blocks: 0"));
    }
}
