//! VectorVM Run - Assembles a JSON script and executes it
//!
//! Loads a script, optimizes it unless told not to, runs it over the
//! requested number of instances and prints each dataset's output columns
//! as JSON.

mod script;

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vectorvm::{Invocation, Optimizer, Scheduler, VmConfig, disassemble};

use script::{Script, ScriptError};

#[derive(Parser, Debug)]
#[command(name = "vectorvm-run")]
#[command(about = "Assemble and run a VectorVM script")]
struct Cli {
    /// Path to a JSON script
    script: PathBuf,

    /// Instances to run (defaults to the longest input column)
    #[arg(long)]
    instances: Option<usize>,

    /// Instances per chunk
    #[arg(long, default_value_t = vectorvm::config::DEFAULT_INSTANCES_PER_CHUNK)]
    chunk_size: usize,

    /// Chunks per batch
    #[arg(long, default_value_t = vectorvm::config::DEFAULT_CHUNKS_PER_BATCH)]
    chunks_per_batch: usize,

    /// Run every batch on the calling thread
    #[arg(long)]
    serial: bool,

    /// Interpret raw bytecode instead of optimized records
    #[arg(long)]
    raw: bool,

    /// Use unguarded div/rcp/rsq/sqrt/log/pow
    #[arg(long)]
    unsafe_math: bool,

    /// Disable packed acquire/output fusion
    #[arg(long)]
    no_packed_output: bool,

    /// Time stat scopes and print the execution summary
    #[arg(long)]
    stats: bool,

    /// Random stream seed
    #[arg(long, default_value_t = vectorvm::config::DEFAULT_RANDOM_SEED)]
    seed: u64,

    /// Print the disassembly and the optimized records instead of running
    #[arg(long)]
    disassemble: bool,
}

impl Cli {
    fn config(&self) -> VmConfig {
        VmConfig {
            instances_per_chunk: self.chunk_size,
            chunks_per_batch: self.chunks_per_batch,
            parallel: !self.serial,
            optimize_bytecode: !self.raw,
            use_optimized_bytecode: !self.raw,
            safe_math_kernels: !self.unsafe_math,
            packed_output_batching: !self.no_packed_output,
            detailed_stats: self.stats,
            random_seed: self.seed,
        }
    }
}

fn run(cli: &Cli) -> Result<(), ScriptError> {
    let config = cli.config();
    config.validate()?;

    let script = Script::load(&cli.script)?;
    let program = script.program()?;
    let optimized = Optimizer::new(&config).optimize(&program.byte_code, &[])?;

    if cli.disassemble {
        println!("{}", disassemble(&program.byte_code, &[])?);
        if let Some(optimized) = &optimized {
            println!("{optimized}");
        }
        return Ok(());
    }

    let instances = cli.instances.unwrap_or_else(|| script.input_len());
    let data_sets = script.data_sets(instances);
    info!(
        instances,
        bytes = program.byte_code.len(),
        optimized = optimized.is_some(),
        "running {}",
        cli.script.display()
    );

    let invocation = Invocation::new(&program.byte_code, script.registers, instances)
        .with_optimized(optimized.as_ref())
        .with_constants(&program.constants)
        .with_data_sets(&data_sets);
    let summary = Scheduler::new(config).execute(&invocation)?;

    let mut report = serde_json::json!({ "outputs": script.outputs_json(&data_sets) });
    if cli.stats {
        report["summary"] = serde_json::json!(summary);
    }
    println!("{report:#}");
    Ok(())
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vectorvm=info,vectorvm_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{e}");
        std::process::exit(1);
    }
}
