//! Packed-output batching.
//!
//! Scripts that emit surviving instances look like this:
//!
//! ```text
//! acquireindex     ds, valid, r9
//! outputdata_32bit ds, r9, r1, 0
//! outputdata_32bit ds, r9, c0, 1
//! outputdata_32bit ds, r9, r2, 2
//! ```
//!
//! Unfused, every valid lane bumps the dataset counter separately and every
//! output walks all lanes checking for [`INDEX_NONE`]. The fused form
//! reserves one contiguous range per chunk with a single `fetch_add`, then
//! writes each column straight into it:
//!
//! ```text
//! packed_acquire        ds, valid, r9
//! packed_write_variable ds, r9, 2, r1, 0, r2, 2
//! packed_write_splat    ds, r9, 1, c0, 1
//! ```
//!
//! Write records carry `[data_set, index_register, pairs, (source, column) * pairs]`.
//! A run ends at the first op that is not an output, or at a second write to
//! a cell already written, so grouping only reorders writes to distinct
//! cells. An output indexed through any other register fails the whole match.
//! Sequential runs assign the same index to the same lane as the unfused
//! path; parallel runs write the same multiset of values.

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::bytecode::opcode::OP0_CONST;
use crate::bytecode::{ByteCursor, Opcode, OperandCursor};
use crate::dataset::INDEX_NONE;
use crate::executor::{ChunkContext, PackedScratch};
use crate::kernels::{ConstantSource, ExecFn, RegisterSource, Source};
use crate::lanes::{LANE_WIDTH, LaneBlock};
use crate::optimizer::{DecodedOp, Instruction, InstructionTag, decode_op};

/// How a batched write reads its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    /// Register source under constant validity: every lane is valid or none is.
    Copy,
    /// Constant source broadcast over the reserved range.
    Splat,
    /// Register source under per-lane validity.
    Variable,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WriteKind::Copy => "copy",
            WriteKind::Splat => "splat",
            WriteKind::Variable => "variable",
        })
    }
}

// ============================================================================
// Fusion
// ============================================================================

/// Try to fuse the outputs following `acquire`.
///
/// Consumes the directly following `outputdata_32bit` ops that index through
/// the acquire's destination register, grouped by write kind in first-seen
/// order. The run ends, leaving the op under the cursor, at the first other
/// opcode or at a second write to a `(data set, column)` already written in
/// the run; grouping never reorders writes to the same cell.
///
/// An output indexed through any other register fails the match: the cursor
/// goes back to just after the acquire and nothing is emitted. Returns
/// `false` then, and when no output follows.
pub(crate) fn fuse_run(
    acquire: &DecodedOp,
    cursor: &mut ByteCursor<'_>,
    external_register_counts: &[usize],
    out: &mut Vec<Instruction>,
) -> bool {
    let &[data_set, _, index_register] = acquire.operands.as_slice() else {
        return false;
    };
    let constant_validity = acquire.mask & OP0_CONST != 0;
    let start = cursor.position();

    let mut groups: IndexMap<(WriteKind, u16), Vec<u16>> = IndexMap::new();
    let mut written: IndexSet<(u16, u16)> = IndexSet::new();
    loop {
        let position = cursor.position();
        let op = match decode_op(cursor, external_register_counts) {
            Ok(op) if op.opcode == Opcode::OutputData32 => op,
            _ => {
                cursor.rewind_to(position);
                break;
            }
        };
        let &[target, index, source, column] = op.operands.as_slice() else {
            cursor.rewind_to(start);
            return false;
        };
        if index != index_register {
            cursor.rewind_to(start);
            return false;
        }
        if !written.insert((target, column)) {
            cursor.rewind_to(position);
            break;
        }

        let kind = if op.mask & OP0_CONST != 0 {
            WriteKind::Splat
        } else if constant_validity {
            WriteKind::Copy
        } else {
            WriteKind::Variable
        };
        groups
            .entry((kind, target))
            .or_default()
            .extend([source, column]);
    }

    if groups.is_empty() {
        return false;
    }

    out.push(Instruction {
        tag: InstructionTag::PackedAcquire { mask: acquire.mask },
        exec: packed_acquire(acquire.mask),
        operands: vec![data_set, acquire.operands[1], index_register],
    });
    for ((kind, target), pairs) in groups {
        let mut operands = Vec::with_capacity(3 + pairs.len());
        operands.extend([target, index_register, (pairs.len() / 2) as u16]);
        operands.extend(pairs);
        out.push(Instruction {
            tag: InstructionTag::PackedWrite(kind),
            exec: packed_write(kind),
            operands,
        });
    }
    true
}

// ============================================================================
// Runtime
// ============================================================================

/// Packed acquire variant for the validity operand's source mask.
pub fn packed_acquire(mask: u8) -> ExecFn {
    if mask & OP0_CONST != 0 {
        exec_packed_acquire::<ConstantSource>
    } else {
        exec_packed_acquire::<RegisterSource>
    }
}

/// Batched write for `kind`.
pub fn packed_write(kind: WriteKind) -> ExecFn {
    match kind {
        WriteKind::Copy => exec_write_copy,
        WriteKind::Splat => exec_write_splat,
        WriteKind::Variable => exec_write_variable,
    }
}

/// Reserve one output index per valid lane with a single counter update.
///
/// Records the per-block validity for the writes that follow and stores each
/// lane's index (or [`INDEX_NONE`]) in the destination register.
pub fn exec_packed_acquire<S: Source>(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let valid = S::decode(cursor, &ctx.constants);
    let dst = cursor.read_u16();
    let count = ctx.num_instances;

    let mut masks = std::mem::take(&mut ctx.packed.masks);
    masks.clear();
    let mut valid_count = 0usize;
    for block in 0..ctx.num_blocks() {
        let lanes = valid.fetch(&ctx.registers, block).0;
        let live = (count - block * LANE_WIDTH).min(LANE_WIDTH);
        let bits = (0..live)
            .filter(|&lane| lanes[lane] != 0)
            .fold(0u8, |bits, lane| bits | (1 << lane));
        valid_count += bits.count_ones() as usize;
        masks.push(bits);
    }

    let valid_start = if valid_count > 0 {
        ctx.data_sets[data_set as usize].acquire_indices(valid_count as i32, ctx.parallel) + 1
    } else {
        INDEX_NONE
    };

    let mut next = valid_start;
    for (block, &bits) in masks.iter().enumerate() {
        let indices = std::array::from_fn(|lane| {
            if bits & (1 << lane) != 0 {
                next += 1;
                (next - 1) as u32
            } else {
                INDEX_NONE as u32
            }
        });
        ctx.registers.store(dst, block, LaneBlock(indices));
    }

    ctx.packed = PackedScratch {
        masks,
        valid_start,
        valid_count,
        uniform: valid_count == 0 || valid_count == count,
    };
}

/// Read a write record's header: target dataset and pair count.
fn write_header(cursor: &mut dyn OperandCursor) -> (usize, u16) {
    let data_set = cursor.read_u16() as usize;
    let _index_register = cursor.read_u16();
    let pairs = cursor.read_u16();
    (data_set, pairs)
}

/// Contiguous copy of the first `valid_count` lanes of `source`.
fn write_contiguous(ctx: &ChunkContext<'_>, data_set: usize, source: u16, column: u16) {
    let Ok(start) = usize::try_from(ctx.packed.valid_start) else {
        return;
    };
    let data_set = &ctx.data_sets[data_set];
    for lane in 0..ctx.packed.valid_count {
        data_set.write_output(column, start + lane, ctx.registers.lane(source, lane));
    }
}

/// Register sources under uniform validity.
pub fn exec_write_copy(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let (data_set, pairs) = write_header(cursor);
    for _ in 0..pairs {
        let source = cursor.read_u16();
        let column = cursor.read_u16();
        write_contiguous(ctx, data_set, source, column);
    }
}

/// Constant sources broadcast over the reserved range.
pub fn exec_write_splat(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let (data_set, pairs) = write_header(cursor);
    let data_set = &ctx.data_sets[data_set];
    let start = usize::try_from(ctx.packed.valid_start).ok();
    for _ in 0..pairs {
        let bits = ctx.constants.read_bits(cursor.read_u16());
        let column = cursor.read_u16();
        let Some(start) = start else { continue };
        for offset in 0..ctx.packed.valid_count {
            data_set.write_output(column, start + offset, bits);
        }
    }
}

/// Register sources under per-lane validity.
///
/// Uniform chunks take the contiguous path. Mixed chunks compact each block
/// so valid lanes land back to back; a whole block is stored while at least
/// four writes remain, the tail lane by lane.
pub fn exec_write_variable(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let (data_set_index, pairs) = write_header(cursor);
    for _ in 0..pairs {
        let source = cursor.read_u16();
        let column = cursor.read_u16();
        if ctx.packed.uniform {
            write_contiguous(ctx, data_set_index, source, column);
            continue;
        }

        let Ok(start) = usize::try_from(ctx.packed.valid_start) else {
            continue;
        };
        let data_set = &ctx.data_sets[data_set_index];
        let total = ctx.packed.valid_count;
        let mut written = 0;
        for (block, &bits) in ctx.packed.masks.iter().enumerate() {
            if bits == 0 {
                continue;
            }
            let packed = ctx.registers.block(source, block).compact(bits);
            let lanes = if total - written >= LANE_WIDTH {
                LANE_WIDTH
            } else {
                bits.count_ones() as usize
            };
            for (lane, &value) in packed.0[..lanes].iter().enumerate() {
                data_set.write_output(column, start + written + lane, value);
            }
            written += bits.count_ones() as usize;
        }
    }
}
