//! Chunk executor.
//!
//! # Architecture
//!
//! A [`ChunkExecutor`] owns one [`ChunkContext`] (register file, random
//! stream, batch-local ID staging) and runs every chunk of one batch through
//! it:
//!
//! ```text
//! Idle ──prepare_for_invocation──► PreparedForInvocation
//!                                     │
//!          ┌──────────────────────────┘
//!          ▼
//!   prepare_for_chunk ──► PreparedForChunk ──execute_*──► Executing ──► ChunkDone
//!          ▲                                                              │
//!          └──────────────────────────────────────────────────────────────┘
//!
//! ChunkDone ──finish_invocation──► Idle
//! ```
//!
//! Out-of-order calls are programming errors and trip `debug_assert!`s.
//! Kernels receive `&mut ChunkContext` and never touch shared state except
//! through the atomics on [`DataSetMeta`].

use std::any::Any;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, trace};

use crate::bytecode::{ByteCursor, ConstantTable, Opcode, WordCursor};
use crate::dataset::{BatchLocalState, DataSetMeta, INDEX_NONE};
use crate::error::{Error, Result};
use crate::external::ExternalFunction;
use crate::kernels::handler_for;
use crate::lanes::LANE_WIDTH;
use crate::optimizer::OptimizedProgram;
use crate::registers::RegisterFile;
use crate::rng::RandomStream;

// ============================================================================
// Statistics
// ============================================================================

/// Accumulated time spent inside one stat scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScopeTiming {
    /// Completed enter/exit pairs.
    pub calls: u64,
    /// Total wall time between enter and exit.
    pub elapsed: Duration,
}

impl ScopeTiming {
    /// Fold another total into this one.
    pub fn merge(&mut self, other: ScopeTiming) {
        self.calls += other.calls;
        self.elapsed += other.elapsed;
    }
}

/// Scope id to accumulated timing, in first-entered order.
pub type ScopeTotals = IndexMap<u16, ScopeTiming>;

/// Open scopes and totals for one batch.
#[derive(Debug, Default)]
pub(crate) struct StatScopes {
    enabled: bool,
    open: Vec<(u16, Instant)>,
    totals: ScopeTotals,
}

impl StatScopes {
    pub(crate) fn enter(&mut self, scope: u16) {
        if self.enabled {
            self.open.push((scope, Instant::now()));
        }
    }

    pub(crate) fn exit(&mut self) {
        if !self.enabled {
            return;
        }
        let Some((scope, entered)) = self.open.pop() else {
            trace!("exit_stat_scope without a matching enter");
            return;
        };
        let elapsed = entered.elapsed();
        trace!(scope, ?elapsed, "stat scope");
        self.totals.entry(scope).or_default().merge(ScopeTiming {
            calls: 1,
            elapsed,
        });
    }
}

// ============================================================================
// Chunk Context
// ============================================================================

/// Validity of the most recent packed acquire.
#[derive(Debug, Default)]
pub(crate) struct PackedScratch {
    /// Per lane block, bit *i* set when lane *i* acquired an index.
    pub(crate) masks: Vec<u8>,
    /// First index reserved for this chunk, or [`INDEX_NONE`].
    pub(crate) valid_start: i32,
    /// Number of reserved indices.
    pub(crate) valid_count: usize,
    /// Every instance is valid, or none is.
    pub(crate) uniform: bool,
}

/// Everything a kernel may read or write while running one chunk.
pub struct ChunkContext<'a> {
    pub(crate) registers: RegisterFile,
    pub(crate) constants: ConstantTable<'a>,
    pub(crate) data_sets: &'a [DataSetMeta],
    pub(crate) local: Vec<BatchLocalState>,
    pub(crate) external_functions: &'a [Box<dyn ExternalFunction>],
    pub(crate) user_data: &'a [&'a (dyn Any + Send + Sync)],
    pub(crate) rng: RandomStream,
    pub(crate) start_instance: usize,
    pub(crate) num_instances: usize,
    pub(crate) parallel: bool,
    pub(crate) packed: PackedScratch,
    pub(crate) stats: StatScopes,
    pub(crate) id_scratch: Vec<i32>,
}

impl<'a> ChunkContext<'a> {
    fn new() -> Self {
        Self {
            registers: RegisterFile::new(),
            constants: ConstantTable::default(),
            data_sets: &[],
            local: Vec::new(),
            external_functions: &[],
            user_data: &[],
            rng: RandomStream::default(),
            start_instance: 0,
            num_instances: 0,
            parallel: false,
            packed: PackedScratch::default(),
            stats: StatScopes::default(),
            id_scratch: Vec::new(),
        }
    }

    /// Lane blocks covering the chunk's instances.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.num_instances.div_ceil(LANE_WIDTH)
    }

    /// Instances in the current chunk.
    #[inline]
    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    /// Global index of the chunk's first instance.
    #[inline]
    pub fn start_instance(&self) -> usize {
        self.start_instance
    }

    /// The chunk's register file.
    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    /// A context with `num_registers` registers bound to nothing, running
    /// one chunk of `num_instances` starting at instance 0.
    #[cfg(test)]
    pub(crate) fn for_test(
        num_registers: usize,
        num_instances: usize,
        constants: ConstantTable<'a>,
    ) -> Self {
        let mut ctx = Self::new();
        ctx.registers.resize(num_registers, num_instances);
        ctx.constants = constants;
        ctx.num_instances = num_instances;
        ctx
    }

    #[cfg(test)]
    pub(crate) fn bind_data_sets(&mut self, data_sets: &'a [DataSetMeta]) {
        self.data_sets = data_sets;
        self.local = data_sets.iter().map(|_| BatchLocalState::default()).collect();
    }
}

// ============================================================================
// Executor
// ============================================================================

/// What an invocation binds for the lifetime of a batch.
#[derive(Clone, Copy)]
pub struct Bindings<'a> {
    /// Temporary registers the bytecode uses.
    pub num_registers: usize,
    /// Constant table.
    pub constants: ConstantTable<'a>,
    /// Datasets addressed by index.
    pub data_sets: &'a [DataSetMeta],
    /// Host functions addressed by index.
    pub external_functions: &'a [Box<dyn ExternalFunction>],
    /// Opaque values handed to host functions.
    pub user_data: &'a [&'a (dyn Any + Send + Sync)],
    /// Time stat scopes.
    pub detailed_stats: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorState {
    Idle,
    PreparedForInvocation,
    PreparedForChunk,
    Executing,
    ChunkDone,
}

/// Runs the chunks of one batch.
pub struct ChunkExecutor<'a> {
    ctx: ChunkContext<'a>,
    state: ExecutorState,
}

impl Default for ChunkExecutor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ChunkExecutor<'a> {
    /// Idle executor with no register storage.
    pub fn new() -> Self {
        Self {
            ctx: ChunkContext::new(),
            state: ExecutorState::Idle,
        }
    }

    /// The context of the current chunk.
    pub fn context(&self) -> &ChunkContext<'a> {
        &self.ctx
    }

    /// Bind an invocation and size the register file for chunks of up to
    /// `max_instances`.
    pub fn prepare_for_invocation(
        &mut self,
        bindings: Bindings<'a>,
        max_instances: usize,
        parallel: bool,
        rng: RandomStream,
    ) {
        debug_assert_eq!(self.state, ExecutorState::Idle, "invocation already bound");
        let ctx = &mut self.ctx;
        ctx.registers.resize(bindings.num_registers, max_instances);
        ctx.constants = bindings.constants;
        ctx.data_sets = bindings.data_sets;
        ctx.external_functions = bindings.external_functions;
        ctx.user_data = bindings.user_data;
        ctx.rng = rng;
        ctx.parallel = parallel;
        ctx.local.clear();
        ctx.local
            .resize_with(bindings.data_sets.len(), || BatchLocalState::with_capacity(max_instances));
        ctx.packed = PackedScratch {
            masks: Vec::with_capacity(max_instances.div_ceil(LANE_WIDTH)),
            valid_start: INDEX_NONE,
            valid_count: 0,
            uniform: false,
        };
        ctx.stats = StatScopes {
            enabled: bindings.detailed_stats,
            ..StatScopes::default()
        };
        ctx.id_scratch.clear();
        self.state = ExecutorState::PreparedForInvocation;
    }

    /// Select the instance range `start..start + count` for the next execution.
    pub fn prepare_for_chunk(&mut self, start: usize, count: usize) {
        debug_assert!(
            matches!(
                self.state,
                ExecutorState::PreparedForInvocation | ExecutorState::ChunkDone
            ),
            "prepare_for_chunk in state {:?}",
            self.state
        );
        debug_assert!(
            count.div_ceil(LANE_WIDTH) <= self.ctx.registers.blocks_per_register(),
            "chunk of {count} exceeds the register file"
        );
        self.ctx.start_instance = start;
        self.ctx.num_instances = count;
        self.state = ExecutorState::PreparedForChunk;
    }

    /// Interpret the raw stream until `done`.
    ///
    /// Raw interpretation always uses the zero-guarded math kernels.
    ///
    /// # Errors
    ///
    /// Integrity errors for unknown opcodes or truncation. Streams that
    /// passed [`validate`](crate::bytecode::validate) never produce them.
    pub fn execute_raw(&mut self, byte_code: &[u8]) -> Result<()> {
        self.begin_execution();
        let mut cursor = ByteCursor::new(byte_code);
        loop {
            let opcode = cursor.read_opcode().map_err(|err| {
                let err = match err {
                    Error::Truncated { .. } => Error::MissingDone,
                    other => other,
                };
                error!(%err, "raw byte code is corrupt");
                err
            })?;
            let mask = if opcode.info().has_source_mask() {
                cursor.try_read_u8().inspect_err(|err| {
                    error!(%err, %opcode, "raw byte code is corrupt");
                })?
            } else {
                0
            };
            let Some(handler) = handler_for(opcode, mask, true) else {
                debug_assert_eq!(opcode, Opcode::Done);
                break;
            };
            handler(&mut self.ctx, &mut cursor);
        }
        self.state = ExecutorState::ChunkDone;
        Ok(())
    }

    /// Run every record of an optimized program.
    pub fn execute_optimized(&mut self, program: &OptimizedProgram) {
        self.begin_execution();
        for instruction in program.instructions() {
            (instruction.exec)(&mut self.ctx, &mut WordCursor::new(&instruction.operands));
        }
        self.state = ExecutorState::ChunkDone;
    }

    fn begin_execution(&mut self) {
        debug_assert_eq!(
            self.state,
            ExecutorState::PreparedForChunk,
            "execute without prepare_for_chunk"
        );
        self.state = ExecutorState::Executing;
        trace!(
            start = self.ctx.start_instance,
            count = self.ctx.num_instances,
            "executing chunk"
        );
    }

    /// Publish the batch's ID staging and return its stat-scope totals.
    pub fn finish_invocation(&mut self) -> ScopeTotals {
        debug_assert!(
            matches!(
                self.state,
                ExecutorState::PreparedForInvocation | ExecutorState::ChunkDone
            ),
            "finish_invocation in state {:?}",
            self.state
        );
        let ctx = &mut self.ctx;
        for (data_set, local) in ctx.data_sets.iter().zip(ctx.local.iter_mut()) {
            data_set.finish_chunk(local, ctx.parallel);
        }
        let totals = std::mem::take(&mut ctx.stats.totals);
        ctx.stats.open.clear();
        self.state = ExecutorState::Idle;
        totals
    }
}
