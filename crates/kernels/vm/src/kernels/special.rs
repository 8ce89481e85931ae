//! Kernels that touch datasets, host functions or executor state.
//!
//! Unlike the math kernels these work lane by lane over the chunk's real
//! instances only; padding lanes never reach a dataset.

use crate::bytecode::OperandCursor;
use crate::bytecode::opcode::OP0_CONST;
use crate::dataset::INDEX_NONE;
use crate::executor::ChunkContext;
use crate::external::ExternalCall;
use crate::kernels::{ConstantSource, ExecFn, RegisterSource, Source};
use crate::lanes::{LANE_WIDTH, LaneBlock};

/// Lane `lane` of a decoded source operand.
#[inline]
pub(crate) fn source_lane<S: Source>(source: S, ctx: &ChunkContext<'_>, lane: usize) -> u32 {
    source.fetch(&ctx.registers, lane / LANE_WIDTH).0[lane % LANE_WIDTH]
}

// ============================================================================
// Dataset I/O
// ============================================================================

/// `inputdata_32bit`: lane *i* reads element `start + i`.
pub fn exec_input(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let column = cursor.read_u16();
    let dst = cursor.read_u16();
    let data_set = &ctx.data_sets[data_set as usize];
    for lane in 0..ctx.num_instances {
        let bits = data_set.input_bits(column, ctx.start_instance + lane);
        ctx.registers.set_lane(dst, lane, bits);
    }
}

/// `inputdata_noadvance_32bit`: every lane reads element 0.
pub fn exec_input_no_advance(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let column = cursor.read_u16();
    let dst = cursor.read_u16();
    let block = LaneBlock::splat(ctx.data_sets[data_set as usize].input_bits(column, 0));
    for index in 0..ctx.num_blocks() {
        ctx.registers.store(dst, index, block);
    }
}

/// `outputdata_32bit` variant for a source mask.
pub fn output(mask: u8) -> ExecFn {
    if mask & OP0_CONST != 0 {
        exec_output::<ConstantSource>
    } else {
        exec_output::<RegisterSource>
    }
}

/// `outputdata_32bit`: `out[index[i]] = value[i]` unless the index is
/// [`INDEX_NONE`].
pub fn exec_output<S: Source>(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let index_register = cursor.read_u16();
    let value = S::decode(cursor, &ctx.constants);
    let column = cursor.read_u16();
    let data_set = &ctx.data_sets[data_set as usize];
    for lane in 0..ctx.num_instances {
        let index = ctx.registers.lane(index_register, lane) as i32;
        if let Ok(index) = usize::try_from(index) {
            data_set.write_output(column, index, source_lane(value, ctx, lane));
        }
    }
}

/// `acquireindex` variant for a source mask.
pub fn acquire_index(mask: u8) -> ExecFn {
    if mask & OP0_CONST != 0 {
        exec_acquire_index::<ConstantSource>
    } else {
        exec_acquire_index::<RegisterSource>
    }
}

/// `acquireindex`: one output index per lane whose validity is nonzero,
/// [`INDEX_NONE`] elsewhere.
pub fn exec_acquire_index<S: Source>(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let valid = S::decode(cursor, &ctx.constants);
    let dst = cursor.read_u16();
    let data_set = &ctx.data_sets[data_set as usize];
    for lane in 0..ctx.num_instances {
        let index = if source_lane(valid, ctx, lane) != 0 {
            data_set.acquire_index(ctx.parallel)
        } else {
            INDEX_NONE
        };
        ctx.registers.set_lane(dst, lane, index as u32);
    }
}

/// `exec_index`: lane *i* holds `start + i`.
pub fn exec_index(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let dst = cursor.read_u16();
    let start = ctx.start_instance;
    for index in 0..ctx.num_blocks() {
        let first = start + index * LANE_WIDTH;
        let block = LaneBlock(std::array::from_fn(|lane| (first + lane) as u32));
        ctx.registers.store(dst, index, block);
    }
}

// ============================================================================
// Host Calls & Stats
// ============================================================================

/// `external_func_call`: hand the chunk to a bound host function.
pub fn exec_external_call(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let index = cursor.read_u8();
    let functions = ctx.external_functions;
    let function = &functions[index as usize];
    let mut call = ExternalCall::new(ctx, cursor, function.register_count());
    function.execute(&mut call);
    call.skip_remaining();
}

/// `enter_stat_scope`
pub fn exec_enter_stat_scope(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let scope = cursor.read_u16();
    ctx.stats.enter(scope);
}

/// `exit_stat_scope`
pub fn exec_exit_stat_scope(ctx: &mut ChunkContext<'_>, _cursor: &mut dyn OperandCursor) {
    ctx.stats.exit();
}

// ============================================================================
// Persistent IDs
// ============================================================================

/// `update_id`: commit each lane's index for its ID, or stage the ID for
/// release when the index is [`INDEX_NONE`].
pub fn exec_update_id(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set_index = cursor.read_u16() as usize;
    let id_register = cursor.read_u16();
    let index_register = cursor.read_u16();
    let data_set = &ctx.data_sets[data_set_index];
    let local = &mut ctx.local[data_set_index];
    for lane in 0..ctx.num_instances {
        let id = ctx.registers.lane(id_register, lane) as i32;
        let index = ctx.registers.lane(index_register, lane) as i32;
        data_set.update_id(local, id, index);
    }
}

/// `acquire_id`: pop one free ID per lane and write the dataset's tag.
pub fn exec_acquire_id(ctx: &mut ChunkContext<'_>, cursor: &mut dyn OperandCursor) {
    let data_set = cursor.read_u16();
    let id_register = cursor.read_u16();
    let tag_register = cursor.read_u16();
    let data_set = &ctx.data_sets[data_set as usize];
    let count = ctx.num_instances;

    ctx.id_scratch.resize(count, INDEX_NONE);
    data_set.acquire_ids(&mut ctx.id_scratch[..count]);

    let tag = data_set.acquire_tag() as u32;
    for (lane, &id) in ctx.id_scratch[..count].iter().enumerate() {
        ctx.registers.set_lane(id_register, lane, id as u32);
        ctx.registers.set_lane(tag_register, lane, tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ConstantTable, Opcode, WordCursor};
    use crate::dataset::DataSetMeta;
    use crate::kernels::handler_for;

    fn run(ctx: &mut ChunkContext<'_>, opcode: Opcode, mask: u8, words: &[u16]) {
        let handler = handler_for(opcode, mask, true).unwrap();
        handler(ctx, &mut WordCursor::new(words));
    }

    #[test]
    fn input_reads_from_the_chunk_start() {
        let data_sets = [DataSetMeta::new().with_input_i32(&[10, 11, 12, 13, 14, 15])];
        let mut ctx = ChunkContext::for_test(1, 4, ConstantTable::default());
        ctx.bind_data_sets(&data_sets);
        ctx.start_instance = 3;

        run(&mut ctx, Opcode::InputData32, 0, &[0, 0, 0]);
        assert_eq!(ctx.registers.block(0, 0).0, [13, 14, 15, 0]);

        run(&mut ctx, Opcode::InputDataNoAdvance32, 0, &[0, 0, 0]);
        assert_eq!(ctx.registers.block(0, 0).0, [10; 4]);
    }

    #[test]
    fn acquire_then_output_skips_invalid_lanes() {
        let data_sets = [DataSetMeta::new().with_outputs(1, 4)];
        let mut ctx = ChunkContext::for_test(3, 4, ConstantTable::default());
        ctx.bind_data_sets(&data_sets);
        ctx.registers.store(0, 0, LaneBlock([1, 0, u32::MAX, 0]));
        ctx.registers.store(1, 0, LaneBlock([100, 101, 102, 103]));

        run(&mut ctx, Opcode::AcquireIndex, 0, &[0, 0, 2]);
        assert_eq!(
            ctx.registers.block(2, 0).0.map(|bits| bits as i32),
            [0, INDEX_NONE, 1, INDEX_NONE]
        );

        run(&mut ctx, Opcode::OutputData32, 0, &[0, 2, 1, 0]);
        assert_eq!(data_sets[0].output_i32(0), vec![100, 102, 0, 0]);
        assert_eq!(data_sets[0].written_count(), 2);
    }

    #[test]
    fn constant_outputs_broadcast() {
        let constants = 9i32.to_le_bytes();
        let data_sets = [DataSetMeta::new().with_outputs(1, 4)];
        let mut ctx = ChunkContext::for_test(1, 3, ConstantTable::new(&constants));
        ctx.bind_data_sets(&data_sets);
        ctx.registers.store(0, 0, LaneBlock([3, 1, 0, 2]));

        run(&mut ctx, Opcode::OutputData32, OP0_CONST, &[0, 0, 0, 0]);
        assert_eq!(data_sets[0].output_i32(0), vec![9, 9, 0, 9]);
    }

    #[test]
    fn ids_are_acquired_and_released() {
        let data_sets = [DataSetMeta::new().with_id_capacity(8).with_acquire_tag(5)];
        let mut ctx = ChunkContext::for_test(3, 3, ConstantTable::default());
        ctx.bind_data_sets(&data_sets);

        run(&mut ctx, Opcode::AcquireId, 0, &[0, 0, 1]);
        assert_eq!(ctx.registers.block(0, 0).0[..3], [0, 1, 2]);
        assert_eq!(ctx.registers.block(1, 0).0[..3], [5, 5, 5]);

        ctx.registers.store(2, 0, LaneBlock([7, INDEX_NONE as u32, 9, 0]));
        run(&mut ctx, Opcode::UpdateId, 0, &[0, 0, 2]);
        assert_eq!(&data_sets[0].id_table()[..3], &[7, INDEX_NONE, 9]);
        assert_eq!(ctx.local[0].pending_releases(), &[1]);
        assert_eq!(ctx.local[0].max_id(), 2);
    }

    #[test]
    fn exec_index_counts_from_the_chunk_start() {
        let mut ctx = ChunkContext::for_test(1, 6, ConstantTable::default());
        ctx.start_instance = 40;
        run(&mut ctx, Opcode::ExecIndex, 0, &[0]);
        assert_eq!(ctx.registers.block(0, 0).0, [40, 41, 42, 43]);
        assert_eq!(ctx.registers.lane(0, 5), 45);
    }
}
