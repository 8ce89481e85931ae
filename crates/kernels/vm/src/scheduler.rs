//! Invocation scheduler.
//!
//! # Architecture
//!
//! An invocation runs `N` instances of one script. The scheduler splits them
//! into chunks of at most `instances_per_chunk`, groups chunks into batches,
//! and gives every batch its own [`ChunkExecutor`] and random stream:
//!
//! ```text
//! instances  0 ........................................... N
//! chunks     [ c0 ][ c1 ][ c2 ][ c3 ][ c4 ][ c5 ][ c6 ]
//! batches    [    batch 0       ][    batch 1      ][ b2 ]   ──► rayon
//! ```
//!
//! Batches share only the read-only bytecode and the datasets' atomics, so
//! they run in parallel without locks. The bytecode is validated against the
//! invocation once, before the first chunk.

use std::any::Any;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, instrument, trace};

use crate::bytecode::{ConstantTable, DataSetShape, ValidationLimits, validate};
use crate::config::VmConfig;
use crate::dataset::DataSetMeta;
use crate::error::{Error, Result};
use crate::executor::{Bindings, ChunkExecutor, ScopeTotals};
use crate::external::ExternalFunction;
use crate::optimizer::OptimizedProgram;
use crate::rng::RandomStream;

/// Everything one execution of a script binds.
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    /// Raw instruction stream.
    pub byte_code: &'a [u8],
    /// Optimized form of `byte_code`, if one was produced.
    pub optimized: Option<&'a OptimizedProgram>,
    /// Temporary registers the script uses.
    pub num_temp_registers: usize,
    /// Little-endian constant table.
    pub constant_table: &'a [u8],
    /// Datasets addressed by index.
    pub data_sets: &'a [DataSetMeta],
    /// Host functions addressed by index.
    pub external_functions: &'a [Box<dyn ExternalFunction>],
    /// Values host functions can downcast.
    pub user_data: &'a [&'a (dyn Any + Send + Sync)],
    /// Instances to run.
    pub num_instances: usize,
}

impl<'a> Invocation<'a> {
    /// Invocation of `byte_code` over `num_instances` with nothing else bound.
    pub fn new(byte_code: &'a [u8], num_temp_registers: usize, num_instances: usize) -> Self {
        Self {
            byte_code,
            optimized: None,
            num_temp_registers,
            constant_table: &[],
            data_sets: &[],
            external_functions: &[],
            user_data: &[],
            num_instances,
        }
    }

    /// Bind an optimized program.
    pub fn with_optimized(mut self, program: Option<&'a OptimizedProgram>) -> Self {
        self.optimized = program;
        self
    }

    /// Bind the constant table.
    pub fn with_constants(mut self, constants: &'a [u8]) -> Self {
        self.constant_table = constants;
        self
    }

    /// Bind datasets.
    pub fn with_data_sets(mut self, data_sets: &'a [DataSetMeta]) -> Self {
        self.data_sets = data_sets;
        self
    }

    /// Bind host functions.
    pub fn with_external_functions(mut self, functions: &'a [Box<dyn ExternalFunction>]) -> Self {
        self.external_functions = functions;
        self
    }

    /// Bind user data.
    pub fn with_user_data(mut self, user_data: &'a [&'a (dyn Any + Send + Sync)]) -> Self {
        self.user_data = user_data;
        self
    }

    fn external_register_counts(&self) -> Vec<usize> {
        self.external_functions
            .iter()
            .map(|function| function.register_count())
            .collect()
    }
}

/// How an invocation is cut into chunks and batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    /// Instances to run.
    pub num_instances: usize,
    /// Instances per full chunk.
    pub instances_per_chunk: usize,
    /// Largest chunk; sizes the register files.
    pub max_instances: usize,
    /// Chunks in total.
    pub num_chunks: usize,
    /// Chunks per batch.
    pub chunks_per_batch: usize,
    /// Batches in total.
    pub num_batches: usize,
    /// Whether batches run on the thread pool.
    pub parallel: bool,
}

impl ChunkPlan {
    /// Instance range `(start, count)` of chunk `chunk`.
    pub fn chunk_range(&self, chunk: usize) -> (usize, usize) {
        let start = chunk * self.instances_per_chunk;
        let count = self.instances_per_chunk.min(self.num_instances - start);
        (start, count)
    }

    /// Chunk indices of batch `batch`.
    pub fn batch_chunks(&self, batch: usize) -> std::ops::Range<usize> {
        let first = batch * self.chunks_per_batch;
        first..(first + self.chunks_per_batch).min(self.num_chunks)
    }
}

/// What an invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// Instances run.
    pub instances: usize,
    /// Chunks run.
    pub chunks: usize,
    /// Batches run.
    pub batches: usize,
    /// Whether the optimized program was executed.
    pub optimized: bool,
    /// Stat-scope totals merged across batches.
    pub stat_scopes: ScopeTotals,
}

/// Result of one batch.
struct BatchReport {
    chunks: usize,
    stat_scopes: ScopeTotals,
}

/// Runs invocations under one [`VmConfig`].
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: VmConfig,
}

impl Scheduler {
    /// Scheduler for `config`.
    pub fn new(config: VmConfig) -> Self {
        Self { config }
    }

    /// The config in use.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Chunking for `num_instances`.
    ///
    /// `instances_per_chunk` is clamped to at least 1; [`execute`](Self::execute)
    /// rejects a zero value before planning.
    pub fn plan(&self, num_instances: usize) -> ChunkPlan {
        let per = self.config.instances_per_chunk.max(1);
        let num_chunks = num_instances.div_ceil(per);
        let chunks_per_batch = if self.config.parallel {
            self.config.chunks_per_batch.max(1)
        } else {
            num_chunks.max(1)
        };
        let num_batches = num_chunks.div_ceil(chunks_per_batch);
        ChunkPlan {
            num_instances,
            instances_per_chunk: per,
            max_instances: per.min(num_instances),
            num_chunks,
            chunks_per_batch,
            num_batches,
            parallel: num_batches > 1,
        }
    }

    /// Run every instance of `invocation`.
    ///
    /// # Errors
    ///
    /// Config, validation and integrity errors, all detected before any chunk
    /// runs.
    #[instrument(skip_all, fields(instances = invocation.num_instances))]
    pub fn execute(&self, invocation: &Invocation<'_>) -> Result<ExecutionSummary> {
        self.config.validate()?;
        self.check(invocation)?;

        let plan = self.plan(invocation.num_instances);
        if plan.num_instances == 0 {
            return Ok(ExecutionSummary::default());
        }
        let optimized = invocation
            .optimized
            .filter(|_| self.config.use_optimized_bytecode);
        debug!(
            chunks = plan.num_chunks,
            batches = plan.num_batches,
            max_instances = plan.max_instances,
            parallel = plan.parallel,
            optimized = optimized.is_some(),
            "planned invocation"
        );

        let bindings = Bindings {
            num_registers: invocation.num_temp_registers,
            constants: ConstantTable::new(invocation.constant_table),
            data_sets: invocation.data_sets,
            external_functions: invocation.external_functions,
            user_data: invocation.user_data,
            detailed_stats: self.config.detailed_stats,
        };
        let run_batch = |batch: usize| -> Result<BatchReport> {
            let mut executor = ChunkExecutor::new();
            executor.prepare_for_invocation(
                bindings,
                plan.max_instances,
                plan.parallel,
                RandomStream::derive(self.config.random_seed, batch as u64),
            );
            let chunks = plan.batch_chunks(batch);
            let num_chunks = chunks.len();
            for chunk in chunks {
                let (start, count) = plan.chunk_range(chunk);
                executor.prepare_for_chunk(start, count);
                match optimized {
                    Some(program) => executor.execute_optimized(program),
                    None => executor.execute_raw(invocation.byte_code)?,
                }
                trace!(batch, chunk, start, count, "chunk done");
            }
            Ok(BatchReport {
                chunks: num_chunks,
                stat_scopes: executor.finish_invocation(),
            })
        };

        let reports = if plan.parallel {
            (0..plan.num_batches)
                .into_par_iter()
                .map(run_batch)
                .collect::<Result<Vec<_>>>()?
        } else {
            (0..plan.num_batches)
                .map(run_batch)
                .collect::<Result<Vec<_>>>()?
        };

        let mut summary = ExecutionSummary {
            instances: plan.num_instances,
            batches: plan.num_batches,
            optimized: optimized.is_some(),
            ..ExecutionSummary::default()
        };
        for report in reports {
            summary.chunks += report.chunks;
            for (scope, timing) in report.stat_scopes {
                summary.stat_scopes.entry(scope).or_default().merge(timing);
            }
        }
        Ok(summary)
    }

    /// Validate the raw stream against what the invocation binds, then check
    /// the optimized program was lowered from that stream with the bound
    /// functions' operand counts.
    fn check(&self, invocation: &Invocation<'_>) -> Result<()> {
        let shapes: Vec<DataSetShape> = invocation.data_sets.iter().map(DataSetMeta::shape).collect();
        let counts = invocation.external_register_counts();
        validate(
            invocation.byte_code,
            &ValidationLimits {
                num_registers: invocation.num_temp_registers,
                constant_len: invocation.constant_table.len(),
                data_sets: &shapes,
                external_register_counts: &counts,
            },
        )?;

        let Some(program) = invocation.optimized else {
            return Ok(());
        };
        if program.byte_code() != invocation.byte_code {
            let err = Error::OptimizedProgramMismatch {
                expected: invocation.byte_code.len(),
                found: program.byte_code().len(),
            };
            error!(%err, "optimized program does not match the raw byte code");
            return Err(err);
        }
        let decoded = program.external_register_counts();
        for (index, &expected) in counts.iter().enumerate() {
            let found = decoded.get(index).copied().unwrap_or_default();
            if found != expected {
                let err = Error::ExternalOperandCount {
                    index: index as u8,
                    expected,
                    found,
                };
                error!(%err, "optimized program does not match the bound functions");
                return Err(err);
            }
        }
        Ok(())
    }
}
