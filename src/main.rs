//! STAKEBOOK — progressive staking ledger for sequential race wagering.
//!
//! Entry point. Loads configuration, initialises structured logging, wires
//! the ledger store to the racing API and dispatches one subcommand:
//! `run` sweeps settlements until Ctrl+C, the others act once and exit.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use stakebook::clock::{Clock, SystemClock};
use stakebook::config::AppConfig;
use stakebook::engine::desk::RaceDesk;
use stakebook::engine::placement::{PlacementOutcome, Placer};
use stakebook::engine::poller::{SettlementPoller, SweepTally};
use stakebook::engine::settlement::{SettleTarget, Settler};
use stakebook::platforms::racing_api::RacingApiClient;
use stakebook::platforms::OrderPlacer;
use stakebook::storage::LedgerStore;
use stakebook::types::{LedgerKey, Mode, Variant};

const BANNER: &str = r#"
 ____  _        _        _                 _
/ ___|| |_ __ _| | _____| |__   ___   ___ | | __
\___ \| __/ _` | |/ / _ \ '_ \ / _ \ / _ \| |/ /
 ___) | || (_| |   <  __/ |_) | (_) | (_) |   <
|____/ \__\__,_|_|\_\___|_.__/ \___/ \___/|_|\_\

  Progressive staking ledger
  v0.1.0
"#;

/// Stakebook - progressive staking ledger for sequential race wagering.
#[derive(Parser, Debug)]
#[command(name = "stakebook")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured mode (live, simulation)
    #[arg(long, global = true)]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sweep settlements on the configured interval until Ctrl+C
    Run,

    /// Stake a race on the selected partitions
    Place {
        /// Race identifier
        race: String,
        #[command(flatten)]
        filter: PartitionFilter,
    },

    /// Settle outstanding wagers once
    Settle {
        /// Settle this race instead of the oldest outstanding wager
        #[arg(long)]
        race: Option<String>,
        #[command(flatten)]
        filter: PartitionFilter,
    },

    /// Show ledger state for the selected partitions
    Status {
        #[command(flatten)]
        filter: PartitionFilter,
    },

    /// Clear the selected ledgers
    Reset {
        #[command(flatten)]
        filter: PartitionFilter,

        /// Required; reset is irreversible
        #[arg(long)]
        yes: bool,
    },
}

/// Narrows the configured partitions. No flags selects all of them.
#[derive(Args, Debug, Default)]
struct PartitionFilter {
    /// Only partitions using this progression variant
    #[arg(long)]
    variant: Option<Variant>,

    /// Only partitions for this ticket type
    #[arg(long)]
    ticket: Option<String>,

    /// Only partitions for this location
    #[arg(long)]
    location: Option<String>,
}

impl PartitionFilter {
    fn select(&self, keys: Vec<LedgerKey>) -> Vec<LedgerKey> {
        keys.into_iter()
            .filter(|k| self.variant.map_or(true, |v| k.variant == v))
            .filter(|k| {
                self.ticket
                    .as_deref()
                    .map_or(true, |t| k.partition.ticket == t)
            })
            .filter(|k| {
                self.location
                    .as_deref()
                    .map_or(true, |l| k.partition.location.as_deref() == Some(l))
            })
            .collect()
    }
}

/// Shared components, built once from configuration.
struct App {
    cfg: AppConfig,
    store: Arc<LedgerStore>,
    settler: Arc<Settler>,
    desk: RaceDesk,
}

impl App {
    fn build(cfg: AppConfig) -> Result<Self> {
        let api_key = cfg.api_key();
        if api_key.is_none() && cfg.agent.mode.is_live() {
            warn!("No racing API key configured; live orders will be rejected");
        }
        let api = Arc::new(RacingApiClient::new(
            &cfg.provider.base_url,
            api_key,
            cfg.provider.timeout_secs,
        )?);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(cfg.agent.utc_offset_minutes));
        let progressions = Arc::new(cfg.progression.clone());
        let store = Arc::new(LedgerStore::new(&cfg.agent.data_dir));

        let placer = Arc::new(Placer::new(
            store.clone(),
            progressions.clone(),
            clock.clone(),
        ));
        let settler = Arc::new(Settler::new(
            store.clone(),
            progressions,
            api.clone(),
            clock,
            cfg.agent.settlement_cutoff,
        ));
        let orders: Option<Arc<dyn OrderPlacer>> = if cfg.agent.mode.is_live() {
            Some(api.clone())
        } else {
            None
        };
        let desk = RaceDesk::new(placer, api, orders);

        Ok(Self {
            cfg,
            store,
            settler,
            desk,
        })
    }

    fn keys(&self, filter: &PartitionFilter) -> Result<Vec<LedgerKey>> {
        let keys = filter.select(self.cfg.ledger_keys());
        anyhow::ensure!(!keys.is_empty(), "No configured partition matches the filter");
        Ok(keys)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let mut cfg = AppConfig::load(&cli.config)?;
    if let Some(mode) = cli.mode {
        cfg.agent.mode = mode;
    }

    init_logging();

    let app = App::build(cfg)?;

    match cli.command {
        Commands::Run => run(&app).await,
        Commands::Place { race, filter } => place(&app, &race, &filter).await,
        Commands::Settle { race, filter } => settle(&app, race, &filter).await,
        Commands::Status { filter } => status(&app, &filter),
        Commands::Reset { filter, yes } => reset(&app, &filter, yes).await,
    }
}

/// Poll settlements until Ctrl+C.
async fn run(app: &App) -> Result<()> {
    println!("{BANNER}");
    info!(
        agent_name = %app.cfg.agent.name,
        mode = %app.cfg.agent.mode,
        data_dir = %app.store.root().display(),
        partitions = app.cfg.partitions.len(),
        cutoff = %app.cfg.agent.settlement_cutoff,
        "STAKEBOOK starting up"
    );

    let keys = app.cfg.ledger_keys();
    if keys.is_empty() {
        warn!("No partitions configured, nothing to settle");
        return Ok(());
    }

    let poller = SettlementPoller::new(
        app.settler.clone(),
        keys,
        Duration::from_secs(app.cfg.agent.poll_interval_secs),
    );
    info!("Entering settlement loop. Press Ctrl+C to stop.");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received.");
    };
    let total = poller.run(shutdown).await;

    info!(%total, "STAKEBOOK shut down cleanly.");
    Ok(())
}

/// Stake one race on every selected partition.
async fn place(app: &App, race_id: &str, filter: &PartitionFilter) -> Result<()> {
    let mut failures = 0usize;
    for key in app.keys(filter)? {
        match app.desk.run_race(&key, race_id).await {
            Ok(report) => match &report.outcome {
                PlacementOutcome::Placed {
                    stakes,
                    reset_before,
                    ..
                } => {
                    let total: rust_decimal::Decimal = stakes.iter().map(|s| s.stake).sum();
                    println!(
                        "{key}: placed {race_id} total={total}{}{}",
                        reset_before
                            .map(|r| format!(" (reset before: {r:?})"))
                            .unwrap_or_default(),
                        report
                            .receipt
                            .as_ref()
                            .map(|r| format!(" [{r}]"))
                            .unwrap_or_default(),
                    );
                }
                PlacementOutcome::Skipped { pending_race } => {
                    println!("{key}: skipped, waiting on {pending_race}");
                }
            },
            Err(e) => {
                let chain = format!("{e:#}");
                error!(ledger = %key, race_id, error = %chain, "Placement failed");
                failures += 1;
            }
        }
    }
    anyhow::ensure!(failures == 0, "{failures} placement(s) failed");
    Ok(())
}

/// Settle each selected partition once.
async fn settle(app: &App, race: Option<String>, filter: &PartitionFilter) -> Result<()> {
    let target = match race {
        Some(r) => SettleTarget::Race(r),
        None => SettleTarget::Oldest,
    };
    let mut tally = SweepTally::default();
    for key in app.keys(filter)? {
        match app.settler.settle(&key, &target).await {
            Ok(outcome) => {
                println!("{key}: {outcome:?}");
                tally.record(&outcome);
            }
            Err(e) => {
                error!(ledger = %key, error = %e, "Settlement failed");
                tally.record_error();
            }
        }
    }
    println!("{tally}");
    anyhow::ensure!(tally.errors == 0, "{} settlement(s) failed", tally.errors);
    Ok(())
}

/// Print a one-line summary per ledger.
fn status(app: &App, filter: &PartitionFilter) -> Result<()> {
    for key in app.keys(filter)? {
        let ledger = app
            .store
            .snapshot(&key)
            .with_context(|| format!("Failed to read ledger {key}"))?;
        println!("{key}: {ledger}");
        for record in &ledger.history {
            println!("    {record}");
        }
    }
    Ok(())
}

async fn reset(app: &App, filter: &PartitionFilter, confirmed: bool) -> Result<()> {
    anyhow::ensure!(confirmed, "Refusing to reset without --yes");
    for key in app.keys(filter)? {
        app.store.reset(&key).await?;
        println!("{key}: reset");
    }
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stakebook=info"));

    let json_logging = std::env::var("STAKEBOOK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
