//! Portable 4-lane vector layer.
//!
//! Kernels are written against [`VectorLane`] and never touch intrinsics.
//! The shipped backend is scalar: every operation is an explicit per-lane
//! loop over four elements, which LLVM auto-vectorizes on targets that have
//! 128-bit registers.
//!
//! # Types
//!
//! - [`LaneBlock`] - four raw 32-bit lanes, the unit of register storage
//! - [`F32x4`] / [`I32x4`] - typed views used by float and integer kernels
//! - [`LaneMask`] - comparison result, all-ones for true, all-zeros for false

/// Lanes processed per kernel step.
pub const LANE_WIDTH: usize = 4;

// ============================================================================
// Raw Blocks
// ============================================================================

/// Four raw 32-bit lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, align(16))]
pub struct LaneBlock(pub [u32; LANE_WIDTH]);

impl LaneBlock {
    /// All lanes zero.
    pub const ZERO: LaneBlock = LaneBlock([0; LANE_WIDTH]);

    /// Same bits in every lane.
    #[inline]
    pub const fn splat(bits: u32) -> Self {
        LaneBlock([bits; LANE_WIDTH])
    }

    /// Move the lanes selected by `bits` to the front, preserving order.
    ///
    /// Lanes past the selected count are unspecified.
    #[inline]
    pub fn compact(self, bits: u8) -> Self {
        let shuffle = COMPACTION_SHUFFLE[(bits & 0xF) as usize];
        LaneBlock(shuffle.map(|lane| self.0[lane as usize]))
    }
}

/// Lane order for [`LaneBlock::compact`], indexed by 4-bit validity mask.
pub static COMPACTION_SHUFFLE: [[u8; LANE_WIDTH]; 16] = build_compaction_shuffle();

const fn build_compaction_shuffle() -> [[u8; LANE_WIDTH]; 16] {
    let mut table = [[0u8; LANE_WIDTH]; 16];
    let mut mask = 0;
    while mask < 16 {
        let mut lane = 0;
        let mut out = 0;
        while lane < LANE_WIDTH {
            if mask & (1 << lane) != 0 {
                table[mask][out] = lane as u8;
                out += 1;
            }
            lane += 1;
        }
        mask += 1;
    }
    table
}

/// A value stored in registers as one [`LaneBlock`].
pub trait BlockValue: Copy {
    /// Reinterpret raw lanes.
    fn from_block(block: LaneBlock) -> Self;

    /// Raw lanes of this value.
    fn into_block(self) -> LaneBlock;
}

impl BlockValue for LaneBlock {
    #[inline]
    fn from_block(block: LaneBlock) -> Self {
        block
    }

    #[inline]
    fn into_block(self) -> LaneBlock {
        self
    }
}

// ============================================================================
// Masks
// ============================================================================

/// Per-lane boolean stored as all-ones or all-zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneMask(pub [u32; LANE_WIDTH]);

impl LaneMask {
    /// Mask from per-lane booleans.
    #[inline]
    pub fn from_bools(lanes: [bool; LANE_WIDTH]) -> Self {
        LaneMask(lanes.map(|set| if set { u32::MAX } else { 0 }))
    }

    /// Low four bits, bit *i* taken from the top bit of lane *i*.
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |bits, (lane, value)| bits | (((value >> 31) as u8) << lane))
    }

    /// Number of set lanes.
    #[inline]
    pub fn horizontal_count(self) -> u32 {
        self.bits().count_ones()
    }

    /// Whether lane `lane` is set.
    #[inline]
    pub fn test(self, lane: usize) -> bool {
        self.bits() & (1 << lane) != 0
    }
}

impl BlockValue for LaneMask {
    #[inline]
    fn from_block(block: LaneBlock) -> Self {
        LaneMask(block.0)
    }

    #[inline]
    fn into_block(self) -> LaneBlock {
        LaneBlock(self.0)
    }
}

// ============================================================================
// Typed Lanes
// ============================================================================

/// Four lanes of one scalar type.
pub trait VectorLane: BlockValue {
    /// Lane element type.
    type Scalar: Copy + PartialOrd + PartialEq;

    /// Same value in every lane.
    fn splat(value: Self::Scalar) -> Self;

    /// Lanes as an array.
    fn lanes(self) -> [Self::Scalar; LANE_WIDTH];

    /// Value from per-lane elements.
    fn from_lanes(lanes: [Self::Scalar; LANE_WIDTH]) -> Self;

    /// Lane-wise sum, wrapping for integers.
    fn add(self, other: Self) -> Self;

    /// Lane-wise difference, wrapping for integers.
    fn sub(self, other: Self) -> Self;

    /// Lane-wise product, wrapping for integers.
    fn mul(self, other: Self) -> Self;

    /// Apply `f` to each lane.
    #[inline]
    fn map(self, f: impl FnMut(Self::Scalar) -> Self::Scalar) -> Self {
        Self::from_lanes(self.lanes().map(f))
    }

    /// Combine lanes pairwise.
    #[inline]
    fn zip(self, other: Self, f: impl Fn(Self::Scalar, Self::Scalar) -> Self::Scalar) -> Self {
        let (a, b) = (self.lanes(), other.lanes());
        Self::from_lanes(std::array::from_fn(|lane| f(a[lane], b[lane])))
    }

    /// Lane-wise predicate.
    #[inline]
    fn compare(self, other: Self, f: impl Fn(Self::Scalar, Self::Scalar) -> bool) -> LaneMask {
        let (a, b) = (self.lanes(), other.lanes());
        LaneMask::from_bools(std::array::from_fn(|lane| f(a[lane], b[lane])))
    }

    /// Lane-wise minimum.
    #[inline]
    fn min(self, other: Self) -> Self {
        self.zip(other, |a, b| if b < a { b } else { a })
    }

    /// Lane-wise maximum.
    #[inline]
    fn max(self, other: Self) -> Self {
        self.zip(other, |a, b| if b > a { b } else { a })
    }

    /// `self < other`.
    #[inline]
    fn cmp_lt(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a < b)
    }

    /// `self <= other`.
    #[inline]
    fn cmp_le(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a <= b)
    }

    /// `self > other`.
    #[inline]
    fn cmp_gt(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a > b)
    }

    /// `self >= other`.
    #[inline]
    fn cmp_ge(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a >= b)
    }

    /// `self == other`.
    #[inline]
    fn cmp_eq(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a == b)
    }

    /// `self != other`.
    #[inline]
    fn cmp_neq(self, other: Self) -> LaneMask {
        self.compare(other, |a, b| a != b)
    }

    /// Bitwise blend: `mask` bits from `on_true`, the rest from `on_false`.
    #[inline]
    fn select(mask: LaneMask, on_true: Self, on_false: Self) -> Self {
        let (t, f) = (on_true.into_block().0, on_false.into_block().0);
        Self::from_block(LaneBlock(std::array::from_fn(|lane| {
            (mask.0[lane] & t[lane]) | (!mask.0[lane] & f[lane])
        })))
    }
}

/// Four f32 lanes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct F32x4(pub [f32; LANE_WIDTH]);

impl BlockValue for F32x4 {
    #[inline]
    fn from_block(block: LaneBlock) -> Self {
        F32x4(block.0.map(f32::from_bits))
    }

    #[inline]
    fn into_block(self) -> LaneBlock {
        LaneBlock(self.0.map(f32::to_bits))
    }
}

impl VectorLane for F32x4 {
    type Scalar = f32;

    #[inline]
    fn splat(value: f32) -> Self {
        F32x4([value; LANE_WIDTH])
    }

    #[inline]
    fn lanes(self) -> [f32; LANE_WIDTH] {
        self.0
    }

    #[inline]
    fn from_lanes(lanes: [f32; LANE_WIDTH]) -> Self {
        F32x4(lanes)
    }

    #[inline]
    fn add(self, other: Self) -> Self {
        self.zip(other, |a, b| a + b)
    }

    #[inline]
    fn sub(self, other: Self) -> Self {
        self.zip(other, |a, b| a - b)
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        self.zip(other, |a, b| a * b)
    }
}

/// Four i32 lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct I32x4(pub [i32; LANE_WIDTH]);

impl BlockValue for I32x4 {
    #[inline]
    fn from_block(block: LaneBlock) -> Self {
        I32x4(block.0.map(|bits| bits as i32))
    }

    #[inline]
    fn into_block(self) -> LaneBlock {
        LaneBlock(self.0.map(|value| value as u32))
    }
}

impl VectorLane for I32x4 {
    type Scalar = i32;

    #[inline]
    fn splat(value: i32) -> Self {
        I32x4([value; LANE_WIDTH])
    }

    #[inline]
    fn lanes(self) -> [i32; LANE_WIDTH] {
        self.0
    }

    #[inline]
    fn from_lanes(lanes: [i32; LANE_WIDTH]) -> Self {
        I32x4(lanes)
    }

    #[inline]
    fn add(self, other: Self) -> Self {
        self.zip(other, i32::wrapping_add)
    }

    #[inline]
    fn sub(self, other: Self) -> Self {
        self.zip(other, i32::wrapping_sub)
    }

    #[inline]
    fn mul(self, other: Self) -> Self {
        self.zip(other, i32::wrapping_mul)
    }
}
