//! BatchSettle Scheduler Binary
//!
//! Seeds an in-memory account book, queues demo work items and drains them
//! on the configured calendar schedule until Ctrl+C.

use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batchsettle_common::{Amount, AuditLog, SystemClock};
use batchsettle_ledger::{AccountCharger, AtomicSettlement, InMemoryAccounts, WorkItem, WorkLedger};
use batchsettle_scheduler::{CronCalendar, SchedulerConfig, SettlementScheduler};

/// BatchSettle scheduler CLI
#[derive(Parser, Debug)]
#[command(name = "settlement-scheduler")]
#[command(about = "Drains pending settlement work on a calendar schedule")]
struct Args {
    /// Calendar expression (overrides SETTLE_SCHEDULE)
    #[arg(short, long)]
    schedule: Option<String>,

    /// Drain once immediately after arming
    #[arg(long)]
    fire_now: bool,

    /// Number of in-memory accounts to open
    #[arg(short, long, default_value = "3")]
    accounts: usize,

    /// Opening balance of each account
    #[arg(long, default_value = "1000.00")]
    opening_balance: String,

    /// Number of random work items to queue
    #[arg(long, default_value = "10")]
    demo_items: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

fn init_logging(config: &SchedulerConfig) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = SchedulerConfig::from_env();
    if let Some(schedule) = &args.schedule {
        config.schedule = schedule.clone();
    }
    config.fire_on_start |= args.fire_now;

    init_logging(&config);

    info!("Starting BatchSettle Scheduler");

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let opening_balance = Amount::parse(&args.opening_balance)?.ensure_non_negative("opening_balance")?;

    // Wire collaborators
    let audit = Arc::new(AuditLog::new());
    let accounts = Arc::new(InMemoryAccounts::new());
    for n in 1..=args.accounts {
        accounts.open_with_balance(format!("ACC-{n:03}"), format!("owner-{n}"), opening_balance)?;
    }

    let settlement = Arc::new(AtomicSettlement::new(accounts.clone(), audit.clone()));
    let ledger = Arc::new(WorkLedger::new(audit.clone()));
    let charger = Arc::new(AccountCharger::new(settlement));

    let scheduler = SettlementScheduler::new(
        ledger.clone(),
        charger,
        Arc::new(CronCalendar),
        Arc::new(SystemClock),
        audit.clone(),
    );

    // Queue demo work
    let ids = accounts.ids();
    if !ids.is_empty() {
        let mut rng = match args.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        for n in 1..=args.demo_items {
            let account = ids[rng.gen_range(0..ids.len())].clone();
            let amount = Amount::new(Decimal::new(rng.gen_range(100..10_000), 2));
            ledger.add(WorkItem::for_account(format!("demo-{n:04}"), account, amount))?;
        }
    }

    info!(
        accounts = accounts.len(),
        pending = ledger.len(),
        total_balance = ?accounts.total_balance(),
        "Demo book seeded"
    );

    let next_fire = scheduler.schedule_recurring(&config.schedule)?;
    info!(schedule = %config.schedule, next_fire = %next_fire, "Scheduler running");

    if config.fire_on_start {
        if let Err(e) = scheduler.fire_now().await {
            warn!(error = %e, "Initial drain failed, items stay pending");
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    scheduler.cancel();

    let metrics = scheduler.metrics();
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    print!("{}", metrics.to_prometheus());

    info!(
        pending = ledger.len(),
        audit_events = audit.len(),
        total_balance = ?accounts.total_balance(),
        "Scheduler shutdown complete"
    );
    Ok(())
}
