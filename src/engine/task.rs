use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::data::sources::{ForecastSource, MarketSource, ObservationSource};
use crate::data::types::{ForecastSnapshot, MarketSnapshot, Station};
use crate::error::EngineError;
use crate::execution::executor::Executor;
use crate::execution::persistence::{ArtifactKind, SnapshotKey, SnapshotStore};
use crate::monitoring::logger::CsvLogger;
use crate::rules::RulesRegistry;
use crate::strategies::sizing::{self, CapConfig, CostConfig, DailyBudget};
use crate::strategies::types::EdgeDecision;
use crate::strategies::{microstructure, probability};

/// Per-task state machine. A task walks Idle, Fetching, Mapping, Deciding,
/// Executing, Snapshotting, then back to Idle; `Skipped` is terminal for
/// the cycle and never aborts sibling tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Fetching,
    Mapping,
    Deciding,
    Executing,
    Snapshotting,
    Skipped,
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub station: String,
    pub event_day: NaiveDate,
    pub state: TaskState,
    pub decisions: usize,
    pub trades: usize,
    pub skip_reason: Option<String>,
}

impl TaskOutcome {
    pub fn skipped(station: &Station, event_day: NaiveDate, reason: String) -> Self {
        Self {
            station: station.code.clone(),
            event_day,
            state: TaskState::Skipped,
            decisions: 0,
            trades: 0,
            skip_reason: Some(reason),
        }
    }
}

/// Everything a task needs beyond the (station, day) pair it evaluates.
pub struct TaskContext {
    pub forecast_source: Arc<dyn ForecastSource>,
    pub market_source: Arc<dyn MarketSource>,
    pub observation_source: Option<Arc<dyn ObservationSource>>,
    pub executor: Arc<dyn Executor>,
    pub store: Arc<SnapshotStore>,
    pub budget: Arc<DailyBudget>,
    pub costs: CostConfig,
    pub caps: CapConfig,
    pub forecast_hours: u32,
    pub trend_window_minutes: u32,
    pub decision_log: Option<Arc<CsvLogger>>,
}

/// The pure decision pipeline, mapper then adjuster then sizer, over one
/// cycle's artifacts. Driven identically by the live scheduler and the
/// backtester; the only state it touches is the shared daily budget, inside
/// the sizer. On a mid-ladder error every reservation already granted this
/// cycle is returned: discarded decisions must not burn daily capacity.
pub fn evaluate_cycle(
    rules: &RulesRegistry,
    station: &Station,
    event_day: NaiveDate,
    now: DateTime<Utc>,
    forecast: &ForecastSnapshot,
    market: &MarketSnapshot,
    costs: &CostConfig,
    caps: &CapConfig,
    budget: &DailyBudget,
) -> Result<Vec<EdgeDecision>, EngineError> {
    let station_rule = rules.station_rule(&station.code);
    let venue_rule = rules.venue_rule(&station.venue);
    let mapper_rule = rules.station_rule_or_default(&station.code);
    let bracket_unit = rules.venue_rule_or_default(&station.venue).bracket_unit;
    let edge_min = rules.effective_min_edge(&station.code, &station.venue, caps.edge_min);

    let probs = probability::map(forecast, &market.brackets, &mapper_rule, bracket_unit)?;

    let mut decisions: Vec<EdgeDecision> = Vec::with_capacity(probs.len());
    for prob in &probs {
        let quote = match market.quote_for(&prob.bracket.price_id) {
            Some(q) => q,
            None => continue,
        };
        let delta_p = microstructure::adjust(
            station,
            station_rule,
            venue_rule,
            now,
            event_day,
            prob.bracket.representative_temp(),
            market.trend.as_ref(),
        );
        let decision = match sizing::decide(
            &station.code,
            event_day,
            &prob.bracket,
            prob.p_model,
            delta_p,
            quote,
            costs,
            caps,
            edge_min,
            budget,
            now,
        ) {
            Ok(d) => d,
            Err(e) => {
                let reserved: f64 = decisions.iter().map(|d| d.stake).sum();
                if reserved > 0.0 {
                    budget.release(now.date_naive(), reserved);
                }
                return Err(e);
            }
        };
        decisions.push(decision);
    }
    Ok(decisions)
}

/// One live evaluation of a (station, lookahead-day) pair.
///
/// Acquisition is just-in-time: forecast and market state are fetched
/// concurrently as the last step before computation, so the staleness
/// window between them stays minimal.
pub async fn run_task(
    ctx: &TaskContext,
    rules: &RulesRegistry,
    station: &Station,
    event_day: NaiveDate,
    cycle_ts: DateTime<Utc>,
) -> TaskOutcome {
    let key = SnapshotKey {
        station: station.code.clone(),
        event_day,
        cycle_ts,
    };

    // Fetching
    let (forecast, brackets) = match fetch_inputs(ctx, station, event_day).await {
        Ok(pair) => pair,
        Err(e) => {
            if e.is_transient() {
                warn!(station = %station.code, %event_day, "task skipped: {}", e);
            } else {
                error!(station = %station.code, %event_day, "task skipped: {}", e);
            }
            return TaskOutcome::skipped(station, event_day, e.to_string());
        }
    };

    let mut quotes = Vec::with_capacity(brackets.len());
    for bracket in &brackets {
        match ctx.market_source.quote(&bracket.price_id).await {
            Ok(q) => quotes.push(q),
            Err(e) => warn!(
                station = %station.code,
                price_id = %bracket.price_id,
                "quote fetch failed, bracket excluded: {}", e
            ),
        }
    }
    if quotes.is_empty() {
        return TaskOutcome::skipped(station, event_day, "no quotable brackets".into());
    }

    let trend = match &ctx.observation_source {
        Some(source) => source.recent_trend(station, ctx.trend_window_minutes).await,
        None => None,
    };

    let market = MarketSnapshot {
        brackets,
        quotes,
        trend,
        fetched_at: Utc::now(),
    };

    // Persist inputs immediately after production so the cycle is
    // replayable even when no trade results.
    if let Err(e) = ctx.store.put(&key, ArtifactKind::Forecast, &forecast) {
        error!(station = %station.code, "forecast snapshot write failed: {}", e);
    }
    if let Err(e) = ctx.store.put(&key, ArtifactKind::Market, &market) {
        error!(station = %station.code, "market snapshot write failed: {}", e);
    }

    // Mapping + Deciding
    let decisions = match evaluate_cycle(
        rules,
        station,
        event_day,
        cycle_ts,
        &forecast,
        &market,
        &ctx.costs,
        &ctx.caps,
        &ctx.budget,
    ) {
        Ok(d) => d,
        Err(e) => {
            // The task fails, siblings continue. Transient conditions log
            // quietly; contract violations are loud.
            if e.is_transient() {
                warn!(station = %station.code, %event_day, "cycle skipped: {}", e);
            } else {
                error!(station = %station.code, %event_day, "pipeline contract violation: {}", e);
            }
            return TaskOutcome::skipped(station, event_day, e.to_string());
        }
    };

    if let Some(log) = &ctx.decision_log {
        for decision in &decisions {
            if let Err(e) = log.log_decision(decision) {
                warn!("decision log write failed: {}", e);
            }
        }
    }

    // Executing
    let mut trades = 0;
    for decision in &decisions {
        if !decision.is_trade() {
            continue;
        }
        match ctx.executor.place(decision).await {
            Ok(record) => {
                if let Err(e) = ctx.store.insert_trade(&record) {
                    error!("trade ledger write failed: {}", e);
                }
                trades += 1;
            }
            Err(e) => {
                warn!(
                    station = %station.code,
                    stake = decision.stake,
                    "order placement failed, releasing budget: {}", e
                );
                ctx.budget
                    .release(cycle_ts.date_naive(), decision.stake);
            }
        }
    }

    // Snapshotting
    if let Err(e) = ctx.store.put(&key, ArtifactKind::Decisions, &decisions) {
        error!(station = %station.code, "decision snapshot write failed: {}", e);
    }

    info!(
        station = %station.code,
        %event_day,
        decisions = decisions.len(),
        trades,
        "task complete"
    );

    TaskOutcome {
        station: station.code.clone(),
        event_day,
        state: TaskState::Idle,
        decisions: decisions.len(),
        trades,
        skip_reason: None,
    }
}

async fn fetch_inputs(
    ctx: &TaskContext,
    station: &Station,
    event_day: NaiveDate,
) -> Result<
    (
        ForecastSnapshot,
        Vec<crate::data::types::MarketBracket>,
    ),
    EngineError,
> {
    let (forecast, brackets) = tokio::join!(
        ctx.forecast_source
            .fetch(station, event_day, ctx.forecast_hours),
        ctx.market_source.discover_brackets(station, event_day),
    );
    Ok((forecast?, brackets?))
}
