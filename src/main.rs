use std::path::{Path, PathBuf};
use std::sync::Arc;

use arbgraph::arb::dispatch::{DryRunExecutor, PlanDecision};
use arbgraph::arb::engine::{Engine, PassOutcome};
use arbgraph::arb::error::ArbError;
use arbgraph::arb::graph::GraphBuilder;
use arbgraph::arb::ledger::{JsonlLedger, MemoryLedger, TradeLedger};
use arbgraph::arb::optimizer::flow::FlowProblem;
use arbgraph::arb::types::MarketSnapshot;
use arbgraph::config::EngineConfig;
use arbgraph::utils::logger::setup_logger;
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use futures::future::join_all;
use log::info;
use serde_json::json;

/// Command line of the arbitrage engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Also append log records to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// What to do
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands
#[derive(Subcommand)]
enum Commands {
    /// Run one pass over a snapshot and dispatch the plan with a dry-run executor
    Run {
        /// Market snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        /// Engine configuration JSON file; defaults plus environment if omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Append emitted trades to this JSON-lines ledger
        #[arg(long)]
        ledger: Option<PathBuf>,
    },
    /// Evaluate several trade sizes concurrently on the same snapshot
    Sweep {
        /// Market snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        /// Engine configuration JSON file; defaults plus environment if omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Trade sizes to evaluate, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        sizes: Vec<f64>,
    },
    /// Print the flow-conservation program of a snapshot in LP format
    Lp {
        /// Market snapshot JSON file
        #[arg(long)]
        snapshot: PathBuf,
        /// Engine configuration JSON file; defaults plus environment if omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Attach a realized profit to a recorded trade
    Settle {
        /// JSON-lines ledger
        #[arg(long)]
        ledger: PathBuf,
        /// Transaction reference of the trade
        #[arg(long)]
        reference: String,
        /// Realized profit, in trade-size units
        #[arg(long, allow_negative_numbers = true)]
        profit: f64,
    },
    /// Compare expected and realized profit over a ledger
    Reconcile {
        /// JSON-lines ledger
        #[arg(long)]
        ledger: PathBuf,
    },
}

/// Reads the configuration file, or defaults plus environment when none is given
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => EngineConfig::from_env(),
    }
}

/// Reads a market snapshot from JSON
fn load_snapshot(path: &Path) -> Result<MarketSnapshot> {
    let contents = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&contents).wrap_err_with(|| format!("Failed to parse snapshot {}", path.display()))
}

/// One pass with dry-run emission into the ledger
fn run(config: EngineConfig, snapshot: MarketSnapshot, ledger_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::new(&config)?;
    let outcome = engine.run_pass(&snapshot)?;

    let mut ledger: Box<dyn TradeLedger> = match ledger_path {
        Some(path) => Box::new(JsonlLedger::new(path)),
        None => Box::new(MemoryLedger::new()),
    };
    let records = if outcome.plan.decision == PlanDecision::Accepted {
        engine
            .dispatcher()
            .emit(&outcome.plan, &mut DryRunExecutor::new(), ledger.as_mut())?
    } else {
        Vec::new()
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "outcome": outcome, "records": records }))?
    );
    Ok(())
}

/// One pass per trade size, each on its own blocking task
async fn sweep(config: EngineConfig, snapshot: MarketSnapshot, sizes: Vec<f64>) -> Result<()> {
    let snapshot = Arc::new(snapshot);
    let handles = sizes.into_iter().map(|trade_size| {
        let config = EngineConfig {
            trade_size,
            ..config.clone()
        };
        let snapshot = Arc::clone(&snapshot);
        // Each worker builds its own engine and graph
        tokio::task::spawn_blocking(move || -> Result<PassOutcome, ArbError> {
            Engine::new(&config)?.run_pass(&snapshot)
        })
    });

    let mut summary = Vec::new();
    for joined in join_all(handles).await {
        let outcome = joined??;
        info!(
            "sweep: size {} -> {:?} with weight {:.6}",
            outcome.trade_size, outcome.plan.decision, outcome.plan.total_weight
        );
        summary.push(json!({
            "tradeSize": outcome.trade_size,
            "edges": outcome.graph.len(),
            "decision": outcome.plan.decision,
            "totalWeight": outcome.plan.total_weight,
            "instructions": outcome.plan.instructions().count(),
        }));
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Prints the flow-conservation program of the snapshot's graph
fn print_lp(config: &EngineConfig, snapshot: &MarketSnapshot) -> Result<()> {
    config.validate()?;
    let builder = GraphBuilder::new(config.trade_pairs.clone(), config.trade_size)?;
    let (graph, _) = builder.build(snapshot)?;
    print!("{}", FlowProblem::new(&graph).to_lp_string());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logger(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Run {
            snapshot,
            config,
            ledger,
        } => {
            let config = load_config(config.as_deref())?;
            run(config, load_snapshot(&snapshot)?, ledger)?;
        }
        Commands::Sweep {
            snapshot,
            config,
            sizes,
        } => {
            let config = load_config(config.as_deref())?;
            sweep(config, load_snapshot(&snapshot)?, sizes).await?;
        }
        Commands::Lp { snapshot, config } => {
            let config = load_config(config.as_deref())?;
            print_lp(&config, &load_snapshot(&snapshot)?)?;
        }
        Commands::Settle {
            ledger,
            reference,
            profit,
        } => {
            JsonlLedger::new(ledger).record_realized(&reference, profit)?;
            info!("settled {reference} with realized profit {profit}");
        }
        Commands::Reconcile { ledger } => {
            let reconciliation = JsonlLedger::new(ledger).reconcile()?;
            println!("{}", serde_json::to_string_pretty(&reconciliation)?);
        }
    }

    Ok(())
}
