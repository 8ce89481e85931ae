//! VM configuration.
//!
//! Every tunable lives on [`VmConfig`]. The scheduler and optimizer take a
//! config at construction; nothing reads process-wide state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default instances handled by one chunk.
pub const DEFAULT_INSTANCES_PER_CHUNK: usize = 128;

/// Default chunks grouped into one batch when running in parallel.
pub const DEFAULT_CHUNKS_PER_BATCH: usize = 4;

/// Default seed for the per-invocation random stream.
pub const DEFAULT_RANDOM_SEED: u64 = 0x5EED_5EED_5EED_5EED;

/// Knobs for optimizing and executing bytecode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instances processed by one chunk.
    pub instances_per_chunk: usize,
    /// Chunks grouped into one batch (one executor, one register file).
    pub chunks_per_batch: usize,
    /// Allow batches to run on the rayon pool.
    pub parallel: bool,
    /// Produce optimized programs in [`Optimizer::optimize`](crate::optimizer::Optimizer::optimize).
    pub optimize_bytecode: bool,
    /// Prefer a supplied optimized program over raw interpretation.
    pub use_optimized_bytecode: bool,
    /// Resolve div/rcp/rsq/sqrt/log/pow to their zero-guarded variants when optimizing.
    pub safe_math_kernels: bool,
    /// Fuse `acquireindex` + `outputdata_32bit` runs when optimizing.
    pub packed_output_batching: bool,
    /// Time `enter_stat_scope`/`exit_stat_scope` regions.
    pub detailed_stats: bool,
    /// Seed of the invocation's random stream.
    pub random_seed: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            instances_per_chunk: DEFAULT_INSTANCES_PER_CHUNK,
            chunks_per_batch: DEFAULT_CHUNKS_PER_BATCH,
            parallel: true,
            optimize_bytecode: true,
            use_optimized_bytecode: true,
            safe_math_kernels: true,
            packed_output_batching: true,
            detailed_stats: false,
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }
}

impl VmConfig {
    /// Config that never leaves the calling thread.
    pub fn serial() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Set the chunk size.
    pub fn with_instances_per_chunk(mut self, instances: usize) -> Self {
        self.instances_per_chunk = instances;
        self
    }

    /// Set the number of chunks per batch.
    pub fn with_chunks_per_batch(mut self, chunks: usize) -> Self {
        self.chunks_per_batch = chunks;
        self
    }

    /// Set the random seed.
    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Check the config can drive a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if either chunk dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.instances_per_chunk == 0 {
            return Err(Error::InvalidConfig(
                "instances_per_chunk must be at least 1".to_string(),
            ));
        }
        if self.chunks_per_batch == 0 {
            return Err(Error::InvalidConfig(
                "chunks_per_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let config = VmConfig::default();
        assert_eq!(config.instances_per_chunk, 128);
        assert_eq!(config.chunks_per_batch, 4);
        assert!(config.parallel);
        assert!(config.optimize_bytecode);
        assert!(config.use_optimized_bytecode);
        assert!(config.safe_math_kernels);
        assert!(config.packed_output_batching);
        assert!(!config.detailed_stats);
    }

    #[test]
    fn zero_chunk_sizes_are_rejected() {
        assert!(VmConfig::default().validate().is_ok());
        assert!(matches!(
            VmConfig::default().with_instances_per_chunk(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            VmConfig::default().with_chunks_per_batch(0).validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn serial_only_disables_parallelism() {
        let serial = VmConfig::serial();
        assert!(!serial.parallel);
        assert_eq!(
            VmConfig {
                parallel: true,
                ..serial
            },
            VmConfig::default()
        );
    }
}
