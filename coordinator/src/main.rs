//! fedexec - Command Line Interface
//!
//! ## Commands
//! - `init-config` - Write a default configuration file
//! - `aggregate` - Split a CSV matrix across in-process workers and run one
//!   aggregate over the federated data

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fedexec::federation::partition::distribute;
use fedexec::matrix::aggregate::single_pass_variance;
use fedexec::{
    executor, init_from_config, AggregateUnaryOperator, CacheableData, Config, Data,
    ExecutionContext, FType, FederatedValue, IdSequence, Instruction, MatrixBlock,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Federated matrix aggregation
#[derive(Parser, Debug)]
#[command(name = "fedexec")]
#[command(about = "Federated execution and aggregation over partitioned matrices", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.fedexec/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Run one aggregate over a CSV matrix split across workers
    Aggregate {
        /// CSV file with one matrix row per line
        #[arg(short, long)]
        input: PathBuf,

        /// Aggregate opcode (uak+, uarmean, uacvar, cm, ...)
        #[arg(short, long)]
        opcode: String,

        /// Number of workers (defaults to runtime.default_partitions)
        #[arg(short, long)]
        partitions: Option<usize>,

        /// Partitioning axis
        #[arg(short, long, value_enum, default_value_t = Layout::Row)]
        layout: Layout,

        /// Compare against the local computation
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Layout {
    Row,
    Col,
}

impl From<Layout> for FType {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Row => FType::Row,
            Layout::Col => FType::Col,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::InitConfig { force } => cmd_init_config(config_path, force),
        Commands::Aggregate {
            input,
            opcode,
            partitions,
            layout,
            verify,
        } => {
            let config = if config_path.exists() {
                Config::load(&config_path)
                    .with_context(|| format!("Failed to load {}", config_path.display()))?
            } else {
                Config::default()
            };
            init_from_config(&config.logging)?;
            cmd_aggregate(&config, input, &opcode, partitions, layout, verify).await
        }
    }
}

fn cmd_init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

async fn cmd_aggregate(
    config: &Config,
    input: PathBuf,
    opcode: &str,
    partitions: Option<usize>,
    layout: Layout,
    verify: bool,
) -> Result<()> {
    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let block = MatrixBlock::from_csv(&text)?;
    let partitions = partitions.unwrap_or(config.runtime.default_partitions);

    let instruction = aggregate_instruction(opcode)?;
    let ids = Arc::new(IdSequence::new());
    let tid = config.runtime.session_id;

    let map = distribute(
        &ids,
        tid,
        &block,
        partitions,
        layout.into(),
        config.runtime.worker_queue_depth,
    )
    .await?;
    info!(
        rows = block.rows(),
        cols = block.cols(),
        partitions = map.len(),
        ftype = %map.ftype(),
        "Input federated"
    );

    let mut ec = ExecutionContext::new(tid, ids.clone());
    ec.set_variable("X", Data::Matrix(CacheableData::federated(Arc::new(map))));

    let selection = executor::dispatch(instruction, &mut ec).await?;
    if !selection.is_federated() {
        bail!("Instruction '{}' was not selected for federated execution", opcode);
    }
    info!(opcode, federated_ids = ids.current(), "Federated instruction complete");

    let result = match ec.get_variable("R") {
        Some(Data::Scalar(v)) => FederatedValue::Scalar(*v),
        Some(Data::Matrix(m)) => match m.block() {
            Some(block) => FederatedValue::Matrix(block.clone()),
            None => bail!("Result is not materialized"),
        },
        _ => bail!("Result variable was not bound"),
    };
    print_value(&result);

    if verify {
        let expected = local_aggregate(&block, opcode)?;
        if !approx_eq(&result, &expected) {
            bail!("Federated result differs from local result {:?}", expected);
        }
        println!("verified against local computation");
    }
    Ok(())
}

fn aggregate_instruction(opcode: &str) -> Result<Instruction> {
    let text = if opcode == "cm" {
        "CP°cm°X·MATRIX·FP64°2·SCALAR·INT64·true°R·SCALAR·FP64".to_string()
    } else {
        let op = AggregateUnaryOperator::from_opcode(opcode)
            .with_context(|| format!("Unknown aggregate opcode '{}'", opcode))?;
        let output = if op.is_full_aggregate() { "SCALAR" } else { "MATRIX" };
        format!("CP°{}°X·MATRIX·FP64°R·{}·FP64°1", opcode, output)
    };
    Ok(Instruction::parse(&text)?)
}

fn local_aggregate(block: &MatrixBlock, opcode: &str) -> Result<FederatedValue> {
    if opcode == "cm" {
        return Ok(FederatedValue::Scalar(single_pass_variance(
            block.values().iter().copied(),
        )));
    }
    let op = AggregateUnaryOperator::from_opcode(opcode)
        .with_context(|| format!("Unknown aggregate opcode '{}'", opcode))?;
    Ok(block.aggregate(op)?)
}

fn approx_eq(a: &FederatedValue, b: &FederatedValue) -> bool {
    let (a, b) = (a.to_matrix(), b.to_matrix());
    a.shape() == b.shape()
        && a.values().iter().zip(b.values()).all(|(x, y)| {
            let scale = x.abs().max(y.abs()).max(1.0);
            (x - y).abs() <= 1e-9 * scale
        })
}

fn print_value(value: &FederatedValue) {
    match value {
        FederatedValue::Scalar(v) => println!("{}", v),
        FederatedValue::Matrix(m) => {
            for r in 0..m.rows() {
                let row: Vec<String> = m.row(r).iter().map(|v| v.to_string()).collect();
                println!("{}", row.join(","));
            }
        }
    }
}
