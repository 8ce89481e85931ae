//! End-to-end scripts through the scheduler.
//!
//! Every scenario runs through the raw interpreter and the optimized records
//! and must produce the same outputs on both.

mod common;

use common::{raw, run, unpacked};
use vectorvm::{
    DataSetMeta, Error, INDEX_NONE, Invocation, Opcode, Operand, ProgramBuilder, Scheduler,
    VmConfig, assemble,
};

fn all_paths() -> Vec<VmConfig> {
    let base = VmConfig::serial();
    vec![raw(base.clone()), unpacked(base.clone()), base]
}

// =============================================================================
// Arithmetic
// =============================================================================

#[test]
fn test_doubling_writes_each_instance_at_its_index() {
    let mut builder = ProgramBuilder::new();
    let two = builder.constant_f32(2.0);
    builder
        .input(0, 0, 0)
        .mul(Operand::Register(0), two, 1)
        .exec_index(2)
        .output(0, 2, Operand::Register(1), 0)
        .done();
    let program = builder.finish();

    for config in all_paths() {
        let data_sets = [DataSetMeta::new()
            .with_input_f32(&[1.0, 2.0, 3.0, 4.0])
            .with_outputs(1, 4)];
        run(&program, 3, 4, &data_sets, &config);
        assert_eq!(data_sets[0].output_f32(0), vec![2.0, 4.0, 6.0, 8.0]);
    }
}

#[test]
fn test_doubling_through_acquired_indices() {
    let mut builder = ProgramBuilder::new();
    let two = builder.constant_f32(2.0);
    let all = builder.constant_i32(-1);
    builder
        .input(0, 0, 0)
        .mul(Operand::Register(0), two, 1)
        .acquire_index(0, all, 2)
        .output(0, 2, Operand::Register(1), 0)
        .done();
    let program = builder.finish();

    for config in all_paths() {
        let data_sets = [DataSetMeta::new()
            .with_input_f32(&[1.0, 2.0, 3.0, 4.0])
            .with_outputs(1, 4)];
        run(&program, 3, 4, &data_sets, &config);
        assert_eq!(data_sets[0].output_f32(0), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(data_sets[0].written_count(), 4);
    }
}

#[test]
fn test_division_by_zero_yields_zero() {
    let mut builder = ProgramBuilder::new();
    builder
        .input(0, 0, 0)
        .input(0, 1, 1)
        .div(Operand::Register(0), Operand::Register(1), 2)
        .exec_index(3)
        .output(0, 3, Operand::Register(2), 0)
        .done();
    let program = builder.finish();

    for config in all_paths() {
        let data_sets = [DataSetMeta::new()
            .with_input_f32(&[1.0, 1.0, 1.0, 1.0])
            .with_input_f32(&[0.0, 2.0, 0.0, 4.0])
            .with_outputs(1, 4)];
        run(&program, 4, 4, &data_sets, &config);
        assert_eq!(data_sets[0].output_f32(0), vec![0.0, 0.5, 0.0, 0.25]);
    }
}

#[test]
fn test_integer_division_by_zero_yields_zero() {
    let mut builder = ProgramBuilder::new();
    builder
        .input(0, 0, 0)
        .input(0, 1, 1)
        .binary(Opcode::DivI, Operand::Register(0), Operand::Register(1), 2)
        .exec_index(3)
        .output(0, 3, Operand::Register(2), 0)
        .done();
    let program = builder.finish();

    for config in all_paths() {
        let data_sets = [DataSetMeta::new()
            .with_input_i32(&[9, -9, 7, 0])
            .with_input_i32(&[0, 2, 0, 0])
            .with_outputs(1, 4)];
        run(&program, 4, 4, &data_sets, &config);
        assert_eq!(data_sets[0].output_i32(0), vec![0, -4, 0, 0]);
    }
}

#[test]
fn test_fast_math_skips_the_guards() {
    let mut builder = ProgramBuilder::new();
    builder
        .input(0, 0, 0)
        .unary(Opcode::Rcp, Operand::Register(0), 1)
        .exec_index(2)
        .output(0, 2, Operand::Register(1), 0)
        .done();
    let program = builder.finish();
    let data_sets = [DataSetMeta::new()
        .with_input_f32(&[0.0, 2.0])
        .with_outputs(1, 2)];

    let fast = VmConfig {
        safe_math_kernels: false,
        ..VmConfig::serial()
    };
    run(&program, 3, 2, &data_sets, &fast);
    let out = data_sets[0].output_f32(0);
    assert!(out[0].is_infinite());
    assert_eq!(out[1], 0.5);
}

// =============================================================================
// Spawning & Killing
// =============================================================================

#[test]
fn test_killed_instances_are_compacted_out() {
    let source = "
        # keep instances whose age is below the limit
        inputdata_32bit 0, 0, r0
        cmplt r0, c0, r1
        acquireindex 1, r1, r2
        outputdata_32bit 1, r2, r0, 0
        outputdata_32bit 1, r2, c1, 1
        done
    ";
    let byte_code = assemble(source).unwrap();
    let mut constants = Vec::new();
    constants.extend_from_slice(&3.0f32.to_le_bytes());
    constants.extend_from_slice(&7i32.to_le_bytes());
    let ages = [0.5, 4.0, 2.5, 3.0, 1.0, 9.0, 2.9];

    for config in all_paths() {
        let data_sets = [
            DataSetMeta::new().with_input_f32(&ages),
            DataSetMeta::new().with_outputs(2, ages.len()),
        ];
        let optimized = vectorvm::Optimizer::new(&config)
            .optimize(&byte_code, &[])
            .unwrap();
        let invocation = Invocation::new(&byte_code, 3, ages.len())
            .with_optimized(optimized.as_ref())
            .with_constants(&constants)
            .with_data_sets(&data_sets);
        Scheduler::new(config.clone().with_instances_per_chunk(3))
            .execute(&invocation)
            .unwrap();

        assert_eq!(data_sets[1].written_count(), 4);
        assert_eq!(&data_sets[1].output_f32(0)[..4], &[0.5, 2.5, 1.0, 2.9]);
        assert_eq!(&data_sets[1].output_i32(1)[..4], &[7, 7, 7, 7]);
    }
}

#[test]
fn test_invalid_index_skips_the_write() {
    let mut builder = ProgramBuilder::new();
    let none = builder.constant_i32(INDEX_NONE);
    let one = builder.constant_f32(1.0);
    builder
        .unary(Opcode::AbsI, none, 0)
        .unary(Opcode::NegI, Operand::Register(0), 0)
        .output(0, 0, one, 0)
        .done();
    let program = builder.finish();
    let data_sets = [DataSetMeta::new().with_outputs(1, 4)];
    run(&program, 1, 4, &data_sets, &raw(VmConfig::serial()));
    assert_eq!(data_sets[0].output_f32(0), vec![0.0; 4]);
}

// =============================================================================
// Rejection
// =============================================================================

#[test]
fn test_malformed_streams_run_nothing() {
    let data_sets = [DataSetMeta::new()
        .with_input_f32(&[1.0; 4])
        .with_outputs(1, 4)];
    let scheduler = Scheduler::new(VmConfig::serial());

    let cases: Vec<(Vec<u8>, usize, Error)> = vec![
        (vec![Opcode::ExecIndex as u8, 0, 0], 1, Error::MissingDone),
        (
            vec![0xF3, Opcode::Done as u8],
            1,
            Error::UnknownOpcode {
                opcode: 0xF3,
                offset: 0,
            },
        ),
        (
            vec![Opcode::ExecIndex as u8, 5, 0, Opcode::Done as u8],
            2,
            Error::RegisterOutOfRange {
                register: 5,
                available: 2,
            },
        ),
        (
            vec![Opcode::InputData32 as u8, 3, 0, 0, 0, 0, 0, Opcode::Done as u8],
            1,
            Error::DataSetOutOfRange {
                data_set: 3,
                available: 1,
            },
        ),
    ];

    for (byte_code, registers, expected) in cases {
        let invocation = Invocation::new(&byte_code, registers, 4).with_data_sets(&data_sets);
        assert_eq!(scheduler.execute(&invocation), Err(expected));
    }
    assert_eq!(data_sets[0].written_count(), 0);
    assert_eq!(data_sets[0].output_f32(0), vec![0.0; 4]);
}

#[test]
fn test_constant_reads_are_bounds_checked() {
    let mut builder = ProgramBuilder::new();
    builder
        .add(Operand::Register(0), Operand::Constant(4), 0)
        .done();
    let program = builder.finish();
    let constants = 1.0f32.to_le_bytes();
    let invocation = Invocation::new(&program.byte_code, 1, 4).with_constants(&constants);
    assert_eq!(
        Scheduler::new(VmConfig::serial()).execute(&invocation),
        Err(Error::ConstantOutOfRange { offset: 4, len: 4 })
    );
}

#[test]
fn test_optimized_program_from_other_byte_code_is_rejected() {
    let wide = assemble(
        "
        exec_index r7
        outputdata_32bit 0, r7, r7, 0
        done
    ",
    )
    .unwrap();
    let narrow = assemble(
        "
        exec_index r0
        outputdata_32bit 0, r0, r0, 0
        done
    ",
    )
    .unwrap();
    let stale = vectorvm::Optimizer::new(&VmConfig::serial())
        .optimize(&wide, &[])
        .unwrap();

    let data_sets = [DataSetMeta::new().with_outputs(1, 4)];
    let invocation = Invocation::new(&narrow, 1, 4)
        .with_optimized(stale.as_ref())
        .with_data_sets(&data_sets);
    assert_eq!(
        Scheduler::new(VmConfig::serial()).execute(&invocation),
        Err(Error::OptimizedProgramMismatch {
            expected: narrow.len(),
            found: wide.len(),
        })
    );
    assert_eq!(data_sets[0].output_i32(0), vec![0; 4]);
}
