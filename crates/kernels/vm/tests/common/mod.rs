//! Shared helpers for the VectorVM integration tests.

#![allow(dead_code)]

use vectorvm::{
    DataSetMeta, ExecutionSummary, ExternalFunction, Invocation, Optimizer, Program, Scheduler,
    VmConfig,
};

/// Config that interprets raw bytecode.
pub fn raw(config: VmConfig) -> VmConfig {
    VmConfig {
        optimize_bytecode: false,
        ..config
    }
}

/// Config that runs optimized records without packed-output fusion.
pub fn unpacked(config: VmConfig) -> VmConfig {
    VmConfig {
        packed_output_batching: false,
        ..config
    }
}

/// Optimize (per `config`) and execute `program` over `num_instances`.
pub fn run(
    program: &Program,
    num_registers: usize,
    num_instances: usize,
    data_sets: &[DataSetMeta],
    config: &VmConfig,
) -> ExecutionSummary {
    run_with_externals(program, num_registers, num_instances, data_sets, &[], config)
}

/// [`run`] with host functions bound.
pub fn run_with_externals(
    program: &Program,
    num_registers: usize,
    num_instances: usize,
    data_sets: &[DataSetMeta],
    external_functions: &[Box<dyn ExternalFunction>],
    config: &VmConfig,
) -> ExecutionSummary {
    let counts: Vec<usize> = external_functions
        .iter()
        .map(|function| function.register_count())
        .collect();
    let optimized = Optimizer::new(config)
        .optimize(&program.byte_code, &counts)
        .expect("optimize");
    let invocation = Invocation::new(&program.byte_code, num_registers, num_instances)
        .with_optimized(optimized.as_ref())
        .with_constants(&program.constants)
        .with_data_sets(data_sets)
        .with_external_functions(external_functions);
    Scheduler::new(config.clone())
        .execute(&invocation)
        .expect("execute")
}

/// `count` floats spread over a range that exercises signs and fractions.
pub fn sample_inputs(count: usize) -> Vec<f32> {
    (0..count)
        .map(|i| (i as f32 * 0.37 - 5.0) * if i % 3 == 0 { -1.0 } else { 1.0 })
        .collect()
}

/// Rows `0..written_count` of the given output columns, sorted by bits.
pub fn written_rows(data_set: &DataSetMeta, columns: &[usize]) -> Vec<Vec<u32>> {
    let snapshots: Vec<Vec<u32>> = columns
        .iter()
        .map(|&column| data_set.output_bits(column))
        .collect();
    let mut rows: Vec<Vec<u32>> = (0..data_set.written_count())
        .map(|row| snapshots.iter().map(|column| column[row]).collect())
        .collect();
    rows.sort();
    rows
}
