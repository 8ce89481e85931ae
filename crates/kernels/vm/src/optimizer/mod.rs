//! Bytecode optimizer.
//!
//! # Architecture
//!
//! The optimizer lowers a raw stream once into an [`OptimizedProgram`]: a
//! list of records, each holding a resolved [`ExecFn`] and its operands
//! pre-decoded to u16 words. Executing a record is one indirect call with no
//! opcode decode and no source-mask dispatch.
//!
//! ```text
//! raw bytes ──decode──► op ──┬─ acquireindex + outputs ──► packed records (packed.rs)
//!                            ├─ stat scope, stats off  ──► dropped
//!                            └─ everything else        ──► handler_for(op, mask, safe_math)
//! ```
//!
//! Filters apply in order: packed-output batching first, then safe-math
//! substitution. The output is a pure function of the stream, the external
//! operand counts and the config, so optimizing twice yields equal programs.

pub mod packed;

use std::fmt;

use tracing::{debug, error, instrument};

use crate::bytecode::opcode::OperandField;
use crate::bytecode::{ByteCursor, Opcode};
use crate::config::VmConfig;
use crate::error::{Error, Result};
use crate::kernels::{ExecFn, handler_for};

pub use packed::WriteKind;

// ============================================================================
// Program Records
// ============================================================================

/// Which kernel an [`Instruction`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionTag {
    /// A single instruction of the raw stream.
    Op {
        /// Raw opcode.
        opcode: Opcode,
        /// Source mask the variant was resolved for.
        mask: u8,
        /// Whether guarded math kernels were selected.
        safe_math: bool,
    },
    /// Reserve output indices for every valid lane at once.
    PackedAcquire {
        /// Source mask of the validity operand.
        mask: u8,
    },
    /// Write a group of outputs into the reserved range.
    PackedWrite(WriteKind),
}

impl fmt::Display for InstructionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionTag::Op { opcode, mask, .. } if *mask != 0 => {
                write!(f, "{opcode}.{mask:03b}")
            }
            InstructionTag::Op { opcode, .. } => write!(f, "{opcode}"),
            InstructionTag::PackedAcquire { mask } => write!(f, "packed_acquire.{mask:03b}"),
            InstructionTag::PackedWrite(kind) => write!(f, "packed_write_{kind}"),
        }
    }
}

/// One record of an optimized program.
#[derive(Clone)]
pub struct Instruction {
    /// What the record runs.
    pub tag: InstructionTag,
    /// Resolved kernel body.
    pub exec: ExecFn,
    /// Operands after the source mask, one word each.
    pub operands: Vec<u16>,
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.operands == other.operands
    }
}

impl Eq for Instruction {}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("tag", &self.tag)
            .field("operands", &self.operands)
            .finish_non_exhaustive()
    }
}

/// Records in execution order; the end of the list terminates the program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptimizedProgram {
    instructions: Vec<Instruction>,
    external_register_counts: Vec<usize>,
    byte_code: Vec<u8>,
}

impl OptimizedProgram {
    /// Records in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program does nothing.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Operand counts the external calls were decoded with.
    pub fn external_register_counts(&self) -> &[usize] {
        &self.external_register_counts
    }

    /// Raw stream the records were lowered from.
    ///
    /// Records are only range-checked through this stream, so the scheduler
    /// refuses to pair them with any other.
    pub fn byte_code(&self) -> &[u8] {
        &self.byte_code
    }

    /// Records tagged [`InstructionTag::PackedAcquire`].
    pub fn packed_runs(&self) -> usize {
        self.instructions
            .iter()
            .filter(|instruction| matches!(instruction.tag, InstructionTag::PackedAcquire { .. }))
            .count()
    }
}

impl fmt::Display for OptimizedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            write!(f, "{}", instruction.tag)?;
            for (position, word) in instruction.operands.iter().enumerate() {
                let separator = if position == 0 { " " } else { ", " };
                write!(f, "{separator}{word}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// One raw instruction with its operands widened to words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedOp {
    pub(crate) opcode: Opcode,
    pub(crate) mask: u8,
    pub(crate) operands: Vec<u16>,
}

/// Decode the instruction at the cursor.
///
/// A stream that ends where an opcode is expected reports
/// [`Error::MissingDone`].
pub(crate) fn decode_op(
    cursor: &mut ByteCursor<'_>,
    external_register_counts: &[usize],
) -> Result<DecodedOp> {
    let opcode = match cursor.read_opcode() {
        Err(Error::Truncated { .. }) => return Err(Error::MissingDone),
        other => other?,
    };
    let info = opcode.info();
    let mask = if info.has_source_mask() {
        cursor.try_read_u8()?
    } else {
        0
    };

    let mut operands = Vec::with_capacity(info.fields.len());
    for field in info.fields {
        match field {
            OperandField::ExternalIndex => operands.push(cursor.try_read_u8()? as u16),
            OperandField::ExternalOperands => {
                let index = operands.last().copied().unwrap_or_default() as u8;
                let count = *external_register_counts.get(index as usize).ok_or(
                    Error::ExternalFunctionOutOfRange {
                        index,
                        available: external_register_counts.len(),
                    },
                )?;
                for _ in 0..count {
                    operands.push(cursor.try_read_u16()?);
                }
            }
            _ => operands.push(cursor.try_read_u16()?),
        }
    }

    Ok(DecodedOp {
        opcode,
        mask,
        operands,
    })
}

// ============================================================================
// Optimizer
// ============================================================================

/// Lowers raw streams to [`OptimizedProgram`]s.
#[derive(Debug, Clone)]
pub struct Optimizer {
    optimize_bytecode: bool,
    safe_math_kernels: bool,
    packed_output_batching: bool,
    detailed_stats: bool,
}

impl Optimizer {
    /// Optimizer honoring the optimization knobs of `config`.
    pub fn new(config: &VmConfig) -> Self {
        Self {
            optimize_bytecode: config.optimize_bytecode,
            safe_math_kernels: config.safe_math_kernels,
            packed_output_batching: config.packed_output_batching,
            detailed_stats: config.detailed_stats,
        }
    }

    /// Lower `byte_code`.
    ///
    /// `external_register_counts[i]` is the operand word count of external
    /// function `i`. Returns `None` when optimization is disabled.
    ///
    /// # Errors
    ///
    /// Integrity errors for unknown opcodes, truncation or a missing `done`,
    /// and [`Error::ExternalFunctionOutOfRange`] for calls to unknown
    /// functions. Nothing is returned on error.
    #[instrument(skip_all, fields(len = byte_code.len()))]
    pub fn optimize(
        &self,
        byte_code: &[u8],
        external_register_counts: &[usize],
    ) -> Result<Option<OptimizedProgram>> {
        if !self.optimize_bytecode {
            return Ok(None);
        }
        let program = self
            .lower(byte_code, external_register_counts)
            .inspect_err(|err| error!(%err, "optimizer rejected byte code"))?;
        debug!(
            records = program.len(),
            packed_runs = program.packed_runs(),
            safe_math = self.safe_math_kernels,
            "optimized byte code"
        );
        Ok(Some(program))
    }

    fn lower(
        &self,
        byte_code: &[u8],
        external_register_counts: &[usize],
    ) -> Result<OptimizedProgram> {
        let mut cursor = ByteCursor::new(byte_code);
        let mut instructions = Vec::new();

        loop {
            let op = decode_op(&mut cursor, external_register_counts)?;
            match op.opcode {
                Opcode::EnterStatScope | Opcode::ExitStatScope if !self.detailed_stats => continue,
                Opcode::AcquireIndex if self.packed_output_batching => {
                    if packed::fuse_run(&op, &mut cursor, external_register_counts, &mut instructions)
                    {
                        continue;
                    }
                }
                _ => {}
            }

            let Some(exec) = handler_for(op.opcode, op.mask, self.safe_math_kernels) else {
                break;
            };
            instructions.push(Instruction {
                tag: InstructionTag::Op {
                    opcode: op.opcode,
                    mask: op.mask,
                    safe_math: self.safe_math_kernels,
                },
                exec,
                operands: op.operands,
            });
        }

        Ok(OptimizedProgram {
            instructions,
            external_register_counts: external_register_counts.to_vec(),
            byte_code: byte_code.to_vec(),
        })
    }
}
