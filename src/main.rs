use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;

use tempedge::config::{Config, EnvConfig};
use tempedge::data::forecast_api::OpenMeteoSource;
use tempedge::data::market_api::BracketMarketSource;
use tempedge::data::observations::NwsObservationSource;
use tempedge::engine::backtest::Backtester;
use tempedge::engine::scheduler::{Scheduler, SchedulerConfig};
use tempedge::engine::task::TaskContext;
use tempedge::execution::executor::{Executor, PaperExecutor};
use tempedge::execution::persistence::SnapshotStore;
use tempedge::execution::types::ExecutionMode;
use tempedge::monitoring::logger::CsvLogger;
use tempedge::rules::RulesRegistry;
use tempedge::strategies::sizing::DailyBudget;

#[derive(Parser)]
#[command(name = "tempedge", about = "Temperature bracket decision engine")]
struct Cli {
    /// Path to the main configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the continuous scheduling loop
    Run,
    /// Replay archived snapshots over a date range
    Backtest {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from {}", cli.config);
    let config = Config::load(&cli.config)?;
    let env = EnvConfig::load();

    let store = Arc::new(SnapshotStore::new(&config.system.database_path)?);

    match cli.command {
        Command::Run => run_scheduler(config, env, store).await,
        Command::Backtest { from, to } => run_backtest(config, store, from, to),
    }
}

async fn run_scheduler(config: Config, env: EnvConfig, store: Arc<SnapshotStore>) -> Result<()> {
    tracing::info!("Execution mode: {}", config.system.execution_mode);
    tracing::info!("Trade count on disk: {}", store.count_trades()?);

    let executor: Arc<dyn Executor> = match config.system.execution_mode {
        ExecutionMode::Paper => Arc::new(PaperExecutor::new(config.paper.clone())),
        ExecutionMode::Live => {
            anyhow::bail!("live execution requires venue credentials; run in paper mode")
        }
        ExecutionMode::Backtest => {
            anyhow::bail!("backtest mode is driven by the backtest subcommand")
        }
    };

    let decision_log = if config.monitoring.csv_logging {
        Some(Arc::new(CsvLogger::new(
            config.monitoring.csv_log_path.clone(),
        )?))
    } else {
        None
    };

    let ctx = Arc::new(TaskContext {
        forecast_source: Arc::new(OpenMeteoSource::new(env.forecast_base_url)),
        market_source: Arc::new(BracketMarketSource::new(env.market_base_url)),
        observation_source: Some(Arc::new(NwsObservationSource::new(
            env.observation_base_url,
        ))),
        executor,
        store,
        budget: Arc::new(DailyBudget::new(
            config.caps.daily_budget_usd,
            Utc::now().date_naive(),
        )),
        costs: config.costs,
        caps: config.caps,
        forecast_hours: config.engine.forecast_hours,
        trend_window_minutes: config.engine.trend_window_minutes,
        decision_log,
    });

    let scheduler_config = SchedulerConfig {
        interval_secs: config.engine.interval_secs,
        lookahead_days: config.engine.lookahead_days,
        max_concurrent_tasks: config.engine.max_concurrent_tasks,
        task_timeout_secs: config.engine.task_timeout_secs,
        rules_path: config.system.rules_path.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler = Scheduler::new(ctx, scheduler_config, shutdown_rx);

    let mut loop_handle = tokio::spawn(async move { scheduler.run().await });

    // An unrecoverable scheduler error must terminate the process, not
    // leave it idling behind a signal wait.
    let summary = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Stop requested; finishing in-flight cycle...");
            shutdown_tx.send(true)?;
            loop_handle.await??
        }
        joined = &mut loop_handle => joined??,
    };

    println!(
        "Shut down cleanly: {} cycles, {} tasks completed, {} skipped, {} trades placed",
        summary.cycles, summary.tasks_completed, summary.tasks_skipped, summary.trades
    );
    Ok(())
}

fn run_backtest(
    config: Config,
    store: Arc<SnapshotStore>,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<()> {
    let rules = Arc::new(RulesRegistry::load(&config.system.rules_path)?);
    let backtester = Backtester::new(store, rules, config.costs, config.caps, config.backtest);

    let (trades, summary) = backtester.run(from, to)?;

    println!("Backtest {} to {}", from, to);
    println!("  cycles replayed: {}", summary.cycles_replayed);
    println!("  decisions:       {}", summary.decisions);
    println!("  trades:          {}", summary.trades);
    println!("  total staked:    ${:.2}", summary.total_staked);
    println!("  average edge:    {:.4}", summary.avg_edge);
    match summary.hit_rate {
        Some(rate) => println!("  hit rate:        {:.1}%", rate * 100.0),
        None => println!("  hit rate:        n/a (no archived settlements)"),
    }
    match summary.roi {
        Some(roi) => println!("  ROI:             {:.1}%", roi * 100.0),
        None => println!("  ROI:             n/a"),
    }
    for trade in trades.iter().take(20) {
        println!(
            "  {} {} {} stake ${:.2} @ {:.2} edge {:.3}",
            trade.event_day, trade.station, trade.settlement_id, trade.stake, trade.price, trade.edge
        );
    }
    Ok(())
}
