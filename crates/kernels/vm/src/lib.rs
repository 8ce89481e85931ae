//! VectorVM.
//!
//! A register-based bytecode VM that runs one small script over many
//! particle instances at once. Instances are processed four lanes at a time
//! in chunks, chunks are grouped into batches, and batches run on the rayon
//! pool.
//!
//! # Architecture
//!
//! - [`bytecode`] - Opcodes, operand cursors, validation, builder and assembler
//! - [`lanes`] - 4-lane blocks and the [`VectorLane`] arithmetic trait
//! - [`registers`] - The aligned per-batch [`RegisterFile`]
//! - [`kernels`] - Kernel library and the `(opcode, mask) -> ExecFn` tables
//! - [`optimizer`] - Lowering to pre-decoded records, packed-output fusion
//! - [`executor`] - The per-batch [`ChunkExecutor`] state machine
//! - [`scheduler`] - Chunk planning and parallel dispatch
//! - [`dataset`] - Dataset columns, output counters and the ID allocator
//! - [`external`] - Host functions callable from bytecode
//! - [`config`] - [`VmConfig`] knobs
//! - [`error`] - Error types
//!
//! # Execution Model
//!
//! 1. **Validate** - The raw stream is checked once against the invocation
//! 2. **Plan** - Instances are cut into chunks and batches
//! 3. **Execute** - Each batch runs its chunks through the raw interpreter or
//!    the optimized records
//! 4. **Publish** - Each batch merges released IDs and its max ID into the
//!    shared dataset state
//!
//! # Example
//!
//! ```
//! use vectorvm::{DataSetMeta, Invocation, Operand, ProgramBuilder, Scheduler, VmConfig};
//!
//! let mut builder = ProgramBuilder::new();
//! let two = builder.constant_f32(2.0);
//! builder
//!     .input(0, 0, 0)
//!     .mul(Operand::Register(0), two, 1)
//!     .exec_index(2)
//!     .output(0, 2, Operand::Register(1), 0)
//!     .done();
//! let program = builder.finish();
//!
//! let data_sets = [DataSetMeta::new()
//!     .with_input_f32(&[1.0, 2.0, 3.0, 4.0])
//!     .with_outputs(1, 4)];
//! let invocation = Invocation::new(&program.byte_code, 3, 4)
//!     .with_constants(&program.constants)
//!     .with_data_sets(&data_sets);
//!
//! Scheduler::new(VmConfig::default()).execute(&invocation)?;
//! assert_eq!(data_sets[0].output_f32(0), vec![2.0, 4.0, 6.0, 8.0]);
//! # Ok::<(), vectorvm::Error>(())
//! ```

pub mod bytecode;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod external;
pub mod kernels;
pub mod lanes;
pub mod optimizer;
pub mod registers;
pub mod rng;
pub mod scheduler;

pub use bytecode::{
    DataSetShape, Opcode, Operand, Program, ProgramBuilder, assemble, disassemble, validate,
};
pub use config::VmConfig;
pub use dataset::{BatchLocalState, DataSetMeta, INDEX_NONE};
pub use error::{Error, Result};
pub use executor::{Bindings, ChunkContext, ChunkExecutor, ScopeTiming, ScopeTotals};
pub use external::{ExternalCall, ExternalFunction, ExternalInput, ExternalOutput, FnExternal};
pub use kernels::{ExecFn, handler_for};
pub use lanes::{F32x4, I32x4, LANE_WIDTH, LaneBlock, LaneMask, VectorLane};
pub use optimizer::{Instruction, InstructionTag, OptimizedProgram, Optimizer, WriteKind};
pub use registers::RegisterFile;
pub use rng::RandomStream;
pub use scheduler::{ChunkPlan, ExecutionSummary, Invocation, Scheduler};
