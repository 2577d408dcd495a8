//! CLI for running a generated block through the sequential and parallel executors.

use clap::{Args as ClapArgs, Parser};
use parallel_evm::{
    BlockError, BlockExecutorConfig, BlockOutcome, Executor, ParallelBlockExecutor,
    SequentialExecutor, Workload, WorkloadConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Executes a generated block sequentially and in parallel and compares the
/// reconciled output.
#[derive(Debug, Parser)]
#[command(name = "parallel-evm", version)]
struct Args {
    /// Number of funded accounts.
    #[arg(long, default_value_t = 1000)]
    accounts: usize,

    /// Number of transactions in the block.
    #[arg(long, default_value_t = 1000)]
    transactions: usize,

    /// Worker thread counts to run the parallel executor with.
    #[arg(long, value_delimiter = ',', default_value = "1,2,4,8")]
    threads: Vec<usize>,

    /// Random seed of the workload.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Chain ID used for signing and execution.
    #[arg(long, default_value_t = 1)]
    chain_id: u64,

    /// Directory to write per-transaction trace artifacts to.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    #[command(flatten)]
    log: LogArgs,
}

/// Logging configuration arguments.
#[derive(Debug, Clone, Default, ClapArgs)]
struct LogArgs {
    /// Increase logging verbosity (-v = error, -vv = warn, -vvv = info, -vvvv = debug, -vvvvv =
    /// trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colorful console logging.
    #[arg(long = "log.no-color", visible_aliases = ["log-no-color"], global = true)]
    log_no_color: bool,
}

impl LogArgs {
    /// Initializes the tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over `-v` flags. Without either, logging is off.
    fn init(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if self.verbose == 0 {
            EnvFilter::new("off")
        } else {
            let level = match self.verbose {
                1 => Level::ERROR,
                2 => Level::WARN,
                3 => Level::INFO,
                4 => Level::DEBUG,
                _ => Level::TRACE,
            };
            EnvFilter::new(format!("parallel_evm={level},block_reconciler={level}"))
        };

        fmt()
            .with_env_filter(filter)
            .with_target(self.verbose >= 4)
            .with_writer(std::io::stderr)
            .with_ansi(!self.log_no_color)
            .init();
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    args.log.init();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(%err, "block execution aborted");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs every executor and returns whether they all agree.
fn run(args: &Args) -> Result<bool, BlockError> {
    println!("=== Parallel EVM Block Execution ===\n");

    let workload = Workload::generate(WorkloadConfig {
        num_accounts: args.accounts,
        num_transactions: args.transactions,
        seed: args.seed,
        chain_id: args.chain_id,
        ..Default::default()
    });
    let state = workload.create_state();

    println!(
        "Configuration: {} accounts, {} transactions, seed {}\n",
        args.accounts, args.transactions, args.seed
    );

    let base_config = BlockExecutorConfig {
        chain_id: args.chain_id,
        trace_dir: args.trace_dir.clone(),
        ..Default::default()
    };

    let reference = SequentialExecutor::new(base_config.clone()).execute(&state, &workload.transactions)?;
    print_outcome("sequential", &reference, args.transactions);
    println!(
        "{:20} | {} rejected | fees {} | refunded {}",
        "",
        reference.rejected,
        reference.fees_collected,
        reference.refunded
    );

    let mut agree = true;
    for &num_threads in &args.threads {
        let config = BlockExecutorConfig { num_threads, ..base_config.clone() };
        let outcome = ParallelBlockExecutor::new(config).execute(&state, &workload.transactions)?;
        print_outcome(&format!("parallel ({num_threads} threads)"), &outcome, args.transactions);

        if outcome.block != reference.block {
            println!("{:20} | MISMATCH with sequential output", "");
            agree = false;
        }
    }

    println!("\nBlock bloom: {}", reference.block.bloom);
    println!("Executors agree: {}", if agree { "yes" } else { "NO" });
    Ok(agree)
}

fn print_outcome(name: &str, outcome: &BlockOutcome, num_transactions: usize) {
    let elapsed = outcome.duration.as_secs_f64();
    let tps = num_transactions as f64 / elapsed;
    println!(
        "{:20} | {:5} included | {:5} logs | {:5} failed | {:8.2} ms | {:8.0} tx/s",
        name,
        outcome.block.included,
        outcome.block.logs,
        outcome.failed,
        elapsed * 1000.0,
        tps
    );
}
