//! Random stream feeding the `random` and `randomi` kernels.
//!
//! # Stream Model
//!
//! ```text
//! VmConfig::random_seed
//!   └─> derive(seed, batch_index)   one stream per batch
//!         └─> advances once per lane per random opcode, never resets
//! ```
//!
//! Batches own their stream, so results are reproducible for a fixed
//! seed and chunk layout. They are not reproducible across chunk layouts,
//! which is why random opcodes are excluded from chunking laws.

/// SplitMix64 pseudo-random stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomStream {
    state: u64,
}

impl RandomStream {
    /// Stream seeded directly.
    #[inline]
    pub const fn new(seed: u64) -> Self {
        // SplitMix64 needs a non-zero state
        let state = if seed == 0 { GOLDEN_GAMMA } else { seed };
        Self { state }
    }

    /// Independent stream for one batch of an invocation.
    #[inline]
    pub const fn derive(seed: u64, batch_index: u64) -> Self {
        Self::new(splitmix64_mix(seed ^ splitmix64_mix(batch_index.wrapping_add(1))))
    }

    /// Current state, for tests and tracing.
    #[inline]
    pub const fn state(&self) -> u64 {
        self.state
    }

    /// Next raw 64 bits.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(GOLDEN_GAMMA);
        splitmix64_mix(self.state)
    }

    /// Uniform f32 in [0, 1).
    #[inline]
    pub fn fraction(&mut self) -> f32 {
        // upper 24 bits fill the f32 mantissa exactly
        (self.next_u64() >> 40) as f32 * (1.0 / (1u32 << 24) as f32)
    }
}

impl Default for RandomStream {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RANDOM_SEED)
    }
}

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

#[inline]
const fn splitmix64_mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
