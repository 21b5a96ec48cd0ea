//! End-to-end pipeline tests against in-memory collaborators: per-task
//! failure isolation, replay determinism, and daily-budget safety under
//! concurrency.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempedge::data::sources::{ForecastSource, MarketSource, ObservationSource};
use tempedge::data::types::{
    ForecastSnapshot, MarketBracket, MarketQuote, MarketSnapshot, ObservationTrend, Station,
    TempUnit,
};
use tempedge::engine::scheduler::{Scheduler, SchedulerConfig};
use tempedge::engine::task::{evaluate_cycle, run_task, TaskContext, TaskState};
use tempedge::error::EngineError;
use tempedge::execution::executor::Executor;
use tempedge::execution::persistence::{ArtifactKind, SnapshotKey, SnapshotStore};
use tempedge::execution::types::{ExecutionMode, TradeRecord};
use tempedge::rules::RulesRegistry;
use tempedge::strategies::sizing::{CapConfig, CostConfig, DailyBudget};
use tempedge::strategies::types::{DecisionReason, EdgeDecision};

fn station(code: &str) -> Station {
    Station {
        code: code.into(),
        city: code.into(),
        lat: 40.0,
        lon: -73.0,
        timezone: "America/New_York".into(),
        utc_offset_hours: -5,
        venue: "kalshi".into(),
    }
}

fn event_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

fn cycle_ts() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
}

fn forecast_for(code: &str) -> ForecastSnapshot {
    ForecastSnapshot {
        station: code.into(),
        event_day: event_day(),
        fetched_at: cycle_ts(),
        unit: TempUnit::Fahrenheit,
        times: vec![],
        temps: vec![44.0, 46.0, 49.0, 51.0, 52.0, 51.5, 49.0, 46.0],
    }
}

fn brackets() -> Vec<MarketBracket> {
    vec![
        MarketBracket {
            lower: f64::NEG_INFINITY,
            upper: 48.0,
            settlement_id: "s-low".into(),
            price_id: "p-low".into(),
        },
        MarketBracket {
            lower: 48.0,
            upper: 52.0,
            settlement_id: "s-mid".into(),
            price_id: "p-mid".into(),
        },
        MarketBracket {
            lower: 52.0,
            upper: f64::INFINITY,
            settlement_id: "s-high".into(),
            price_id: "p-high".into(),
        },
    ]
}

fn quotes() -> Vec<MarketQuote> {
    vec![
        MarketQuote {
            price_id: "p-low".into(),
            mid: 0.20,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
        MarketQuote {
            price_id: "p-mid".into(),
            mid: 0.25,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
        MarketQuote {
            price_id: "p-high".into(),
            mid: 0.30,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
    ]
}

/// Forecast source that fails for configured stations.
struct StubForecastSource {
    failing: Vec<String>,
}

#[async_trait]
impl ForecastSource for StubForecastSource {
    async fn fetch(
        &self,
        station: &Station,
        _event_day: NaiveDate,
        _hours: u32,
    ) -> Result<ForecastSnapshot, EngineError> {
        if self.failing.contains(&station.code) {
            return Err(EngineError::FetchFailed(format!(
                "connection refused for {}",
                station.code
            )));
        }
        Ok(forecast_for(&station.code))
    }
}

struct StubMarketSource {
    quotes: HashMap<String, MarketQuote>,
}

impl StubMarketSource {
    fn with_quotes(quotes: Vec<MarketQuote>) -> Self {
        Self {
            quotes: quotes
                .into_iter()
                .map(|q| (q.price_id.clone(), q))
                .collect(),
        }
    }
}

#[async_trait]
impl MarketSource for StubMarketSource {
    async fn discover_brackets(
        &self,
        _station: &Station,
        _event_day: NaiveDate,
    ) -> Result<Vec<MarketBracket>, EngineError> {
        Ok(brackets())
    }

    async fn quote(&self, price_id: &str) -> Result<MarketQuote, EngineError> {
        self.quotes
            .get(price_id)
            .cloned()
            .ok_or_else(|| EngineError::FetchFailed(format!("unknown price id {}", price_id)))
    }
}

/// Forecast source that dawdles, for exercising shutdown behavior.
struct SlowForecastSource {
    delay_ms: u64,
}

#[async_trait]
impl ForecastSource for SlowForecastSource {
    async fn fetch(
        &self,
        station: &Station,
        _event_day: NaiveDate,
        _hours: u32,
    ) -> Result<ForecastSnapshot, EngineError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(forecast_for(&station.code))
    }
}

struct NoTrendSource;

#[async_trait]
impl ObservationSource for NoTrendSource {
    async fn recent_trend(&self, _station: &Station, _window: u32) -> Option<ObservationTrend> {
        None
    }
}

/// Executor that fills everything and counts placements.
struct CountingExecutor {
    placed: AtomicUsize,
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn place(&self, decision: &EdgeDecision) -> anyhow::Result<TradeRecord> {
        self.placed.fetch_add(1, Ordering::SeqCst);
        Ok(TradeRecord {
            id: None,
            station: decision.station.clone(),
            event_day: decision.event_day,
            settlement_id: decision.bracket.settlement_id.clone(),
            price_id: decision.bracket.price_id.clone(),
            price: decision.market_mid,
            stake: decision.stake,
            edge: decision.edge,
            executed_at: Utc::now(),
            mode: ExecutionMode::Paper,
        })
    }

    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Paper
    }
}

fn rules_for(stations: Vec<Station>) -> Arc<RulesRegistry> {
    Arc::new(RulesRegistry::from_parts(stations, vec![], vec![]))
}

fn costs() -> CostConfig {
    CostConfig {
        fee_rate: 0.005,
        slippage_rate: 0.003,
    }
}

fn caps() -> CapConfig {
    CapConfig {
        bankroll_usd: 10_000.0,
        kelly_cap: 0.10,
        per_market_cap_usd: 5_000.0,
        daily_budget_usd: 50_000.0,
        edge_min: 0.05,
    }
}

fn context(failing: Vec<String>, budget_cap: f64) -> (Arc<TaskContext>, Arc<CountingExecutor>) {
    context_with_quotes(failing, budget_cap, quotes())
}

fn context_with_quotes(
    failing: Vec<String>,
    budget_cap: f64,
    market_quotes: Vec<MarketQuote>,
) -> (Arc<TaskContext>, Arc<CountingExecutor>) {
    context_with_sources(
        Arc::new(StubForecastSource { failing }),
        budget_cap,
        market_quotes,
    )
}

fn context_with_sources(
    forecast_source: Arc<dyn ForecastSource>,
    budget_cap: f64,
    market_quotes: Vec<MarketQuote>,
) -> (Arc<TaskContext>, Arc<CountingExecutor>) {
    let executor = Arc::new(CountingExecutor {
        placed: AtomicUsize::new(0),
    });
    let ctx = Arc::new(TaskContext {
        forecast_source,
        market_source: Arc::new(StubMarketSource::with_quotes(market_quotes)),
        observation_source: Some(Arc::new(NoTrendSource)),
        executor: executor.clone(),
        store: Arc::new(SnapshotStore::in_memory().unwrap()),
        budget: Arc::new(DailyBudget::new(budget_cap, cycle_ts().date_naive())),
        costs: costs(),
        caps: caps(),
        forecast_hours: 24,
        trend_window_minutes: 60,
        decision_log: None,
    });
    (ctx, executor)
}

fn write_rules_file(name: &str, station_codes: &[&str]) -> String {
    let mut body = String::new();
    for code in station_codes {
        body.push_str(&format!(
            "[[stations]]\n\
             code = \"{code}\"\n\
             city = \"{code}\"\n\
             lat = 40.0\n\
             lon = -73.0\n\
             timezone = \"America/New_York\"\n\
             utc_offset_hours = -5\n\
             venue = \"kalshi\"\n\n"
        ));
    }
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn failed_station_does_not_abort_siblings() {
    let (ctx, executor) = context(vec!["KAAA".into()], 50_000.0);
    let rules = rules_for(vec![station("KAAA"), station("KBBB")]);

    let a = run_task(&ctx, &rules, &station("KAAA"), event_day(), cycle_ts()).await;
    let b = run_task(&ctx, &rules, &station("KBBB"), event_day(), cycle_ts()).await;

    assert_eq!(a.state, TaskState::Skipped);
    assert!(a.skip_reason.unwrap().contains("fetch failed"));

    assert_eq!(b.state, TaskState::Idle);
    assert_eq!(b.decisions, 3);
    assert!(executor.placed.load(Ordering::SeqCst) > 0);

    // The healthy station's cycle is fully snapshotted
    let key = SnapshotKey {
        station: "KBBB".into(),
        event_day: event_day(),
        cycle_ts: cycle_ts(),
    };
    let stored: Option<ForecastSnapshot> = ctx.store.get(&key, ArtifactKind::Forecast).unwrap();
    assert!(stored.is_some());
    let decisions: Option<Vec<EdgeDecision>> =
        ctx.store.get(&key, ArtifactKind::Decisions).unwrap();
    assert_eq!(decisions.unwrap().len(), 3);

    // The failed station wrote nothing
    let key_a = SnapshotKey {
        station: "KAAA".into(),
        event_day: event_day(),
        cycle_ts: cycle_ts(),
    };
    let stored_a: Option<ForecastSnapshot> = ctx.store.get(&key_a, ArtifactKind::Forecast).unwrap();
    assert!(stored_a.is_none());
}

#[tokio::test]
async fn replay_of_same_artifacts_is_bit_identical() {
    let rules = rules_for(vec![station("KNYC")]);
    let st = station("KNYC");
    let forecast = forecast_for("KNYC");
    let market = MarketSnapshot {
        brackets: brackets(),
        quotes: quotes(),
        trend: Some(ObservationTrend {
            direction: 1,
            strength: 0.7,
        }),
        fetched_at: cycle_ts(),
    };

    let run = || {
        let budget = DailyBudget::new(50_000.0, cycle_ts().date_naive());
        evaluate_cycle(
            &rules,
            &st,
            event_day(),
            cycle_ts(),
            &forecast,
            &market,
            &costs(),
            &caps(),
            &budget,
        )
        .unwrap()
    };

    let first = run();
    let second = run();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.p_model.to_bits(), b.p_model.to_bits());
        assert_eq!(a.delta_p.to_bits(), b.delta_p.to_bits());
        assert_eq!(a.edge.to_bits(), b.edge.to_bits());
        assert_eq!(a.stake.to_bits(), b.stake.to_bits());
        assert_eq!(a.reason, b.reason);
    }
}

#[tokio::test]
async fn parallel_tasks_never_overspend_daily_budget() {
    // Many stations race one small shared budget.
    let daily_cap = 800.0;
    let stations: Vec<Station> = (0..24).map(|i| station(&format!("K{:03}", i))).collect();
    let (ctx, _) = context(vec![], daily_cap);
    let rules = rules_for(stations.clone());

    let mut handles = Vec::new();
    for st in stations {
        let ctx = Arc::clone(&ctx);
        let rules = Arc::clone(&rules);
        handles.push(tokio::spawn(async move {
            run_task(&ctx, &rules, &st, event_day(), cycle_ts()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Sum staked across every decision snapshot written this cycle
    let mut total_staked = 0.0;
    for i in 0..24 {
        let key = SnapshotKey {
            station: format!("K{:03}", i),
            event_day: event_day(),
            cycle_ts: cycle_ts(),
        };
        let decisions: Option<Vec<EdgeDecision>> =
            ctx.store.get(&key, ArtifactKind::Decisions).unwrap();
        if let Some(decisions) = decisions {
            total_staked += decisions.iter().map(|d| d.stake).sum::<f64>();
        }
    }
    assert!(
        total_staked <= daily_cap + 1e-6,
        "staked {} exceeds daily cap {}",
        total_staked,
        daily_cap
    );
    assert!(total_staked > 0.0);
}

#[tokio::test]
async fn zero_stake_decisions_are_still_snapshotted() {
    // Quotes near fair value leave every bracket below the edge floor.
    let fair = vec![
        MarketQuote {
            price_id: "p-low".into(),
            mid: 0.14,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
        MarketQuote {
            price_id: "p-mid".into(),
            mid: 0.37,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
        MarketQuote {
            price_id: "p-high".into(),
            mid: 0.50,
            bid_depth: 2_000.0,
            ask_depth: 2_000.0,
        },
    ];
    let (ctx, executor) = context_with_quotes(vec![], 50_000.0, fair);
    let rules = rules_for(vec![station("KCCC")]);

    let outcome = run_task(&ctx, &rules, &station("KCCC"), event_day(), cycle_ts()).await;
    assert_eq!(outcome.state, TaskState::Idle);
    assert_eq!(outcome.decisions, 3);
    assert_eq!(outcome.trades, 0);
    assert_eq!(executor.placed.load(Ordering::SeqCst), 0);

    // Zero-stake decisions still land in the archive with reason codes
    let key = SnapshotKey {
        station: "KCCC".into(),
        event_day: event_day(),
        cycle_ts: cycle_ts(),
    };
    let decisions: Vec<EdgeDecision> = ctx
        .store
        .get(&key, ArtifactKind::Decisions)
        .unwrap()
        .unwrap();
    assert_eq!(decisions.len(), 3);
    for d in &decisions {
        assert_eq!(d.stake, 0.0);
        assert_eq!(d.reason, DecisionReason::BelowEdgeThreshold);
    }
}

#[tokio::test]
async fn aborted_cycle_returns_reserved_budget() {
    // First bracket trades and reserves budget, second carries a corrupt
    // quote that fails the cycle. The earlier reservation must come back.
    let daily_cap = 10_000.0;
    let rules = rules_for(vec![station("KNYC")]);
    let st = station("KNYC");
    let forecast = forecast_for("KNYC");
    let market = MarketSnapshot {
        brackets: brackets(),
        quotes: vec![
            MarketQuote {
                price_id: "p-low".into(),
                mid: 0.05,
                bid_depth: 2_000.0,
                ask_depth: 2_000.0,
            },
            MarketQuote {
                price_id: "p-mid".into(),
                mid: 1.5,
                bid_depth: 2_000.0,
                ask_depth: 2_000.0,
            },
        ],
        trend: None,
        fetched_at: cycle_ts(),
    };
    let budget = DailyBudget::new(daily_cap, cycle_ts().date_naive());

    let err = evaluate_cycle(
        &rules,
        &st,
        event_day(),
        cycle_ts(),
        &forecast,
        &market,
        &costs(),
        &caps(),
        &budget,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidQuote(_)));
    assert!(
        (budget.remaining(cycle_ts().date_naive()) - daily_cap).abs() < 1e-9,
        "budget not restored after aborted cycle"
    );
}

#[tokio::test]
async fn scheduler_completes_cycle_over_lookahead_days() {
    let rules_path = write_rules_file("tempedge_sched_cycle.toml", &["KNYC"]);
    let (ctx, _) = context(vec![], 50_000.0);
    let config = SchedulerConfig {
        interval_secs: 60,
        lookahead_days: 2,
        max_concurrent_tasks: 2,
        task_timeout_secs: 5,
        rules_path,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut scheduler = Scheduler::new(ctx, config, shutdown_rx);
    let handle = tokio::spawn(async move { scheduler.run().await });

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.cycles, 1);
    // One station evaluated independently for today and tomorrow
    assert_eq!(summary.tasks_completed, 2);
    assert_eq!(summary.tasks_skipped, 0);
    assert_eq!(summary.decisions, 6);
}

#[tokio::test]
async fn stop_request_skips_queued_tasks() {
    let rules_path = write_rules_file("tempedge_sched_stop.toml", &["KNYC"]);
    let (ctx, _) = context_with_sources(
        Arc::new(SlowForecastSource { delay_ms: 300 }),
        50_000.0,
        quotes(),
    );
    let config = SchedulerConfig {
        interval_secs: 60,
        lookahead_days: 4,
        max_concurrent_tasks: 1,
        task_timeout_secs: 5,
        rules_path,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut scheduler = Scheduler::new(ctx, config, shutdown_rx);
    let handle = tokio::spawn(async move { scheduler.run().await });

    // Stop while the first task still holds the one permit: the other
    // three are queued and must skip instead of starting.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.tasks_completed, 1);
    assert_eq!(summary.tasks_skipped, 3);
}

#[tokio::test]
async fn scheduler_fails_fast_on_missing_rules_file() {
    let (ctx, _) = context(vec![], 50_000.0);
    let config = SchedulerConfig {
        interval_secs: 60,
        lookahead_days: 1,
        max_concurrent_tasks: 1,
        task_timeout_secs: 5,
        rules_path: "/nonexistent/rules.toml".into(),
    };

    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut scheduler = Scheduler::new(ctx, config, shutdown_rx);
    let err = scheduler.run().await.unwrap_err();
    assert!(err.to_string().contains("Failed to read rules file"));
}
