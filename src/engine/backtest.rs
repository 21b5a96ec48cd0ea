use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::data::types::{ForecastSnapshot, MarketSnapshot};
use crate::engine::task::evaluate_cycle;
use crate::execution::persistence::{ArtifactKind, SnapshotStore};
use crate::execution::types::{ExecutionMode, TradeRecord};
use crate::rules::RulesRegistry;
use crate::strategies::sizing::{CapConfig, CostConfig, DailyBudget};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BacktestConfig {
    /// Archive retention window. Ranges starting earlier than this are
    /// rejected instead of silently truncated.
    pub max_history_days: u32,
}

#[derive(Debug, Default)]
pub struct BacktestSummary {
    pub cycles_replayed: u64,
    pub decisions: u64,
    pub trades: u64,
    pub total_staked: f64,
    pub avg_edge: f64,
    /// Only over trades whose settlement is archived.
    pub hit_rate: Option<f64>,
    pub roi: Option<f64>,
}

/// Replays the identical mapper/adjuster/sizer pipeline over archived
/// snapshots, with the same daily-budget sharing rule, and no live fetches
/// or execution.
pub struct Backtester {
    store: Arc<SnapshotStore>,
    rules: Arc<RulesRegistry>,
    costs: CostConfig,
    caps: CapConfig,
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(
        store: Arc<SnapshotStore>,
        rules: Arc<RulesRegistry>,
        costs: CostConfig,
        caps: CapConfig,
        config: BacktestConfig,
    ) -> Self {
        Self {
            store,
            rules,
            costs,
            caps,
            config,
        }
    }

    pub fn run(&self, from: NaiveDate, to: NaiveDate) -> Result<(Vec<TradeRecord>, BacktestSummary)> {
        if from > to {
            bail!("backtest range start {} is after end {}", from, to);
        }
        let horizon = Utc::now().date_naive()
            - chrono::Duration::days(self.config.max_history_days as i64);
        if from < horizon {
            bail!(
                "backtest range starts {} but the archive only retains {} days (back to {})",
                from,
                self.config.max_history_days,
                horizon
            );
        }

        let mut summary = BacktestSummary::default();
        let mut trades = Vec::new();
        let mut settled_wins = 0u64;
        let mut settled_total = 0u64;
        let mut settled_pnl = 0.0;
        let mut settled_staked = 0.0;
        let mut edge_sum = 0.0;
        // One shared budget per calendar trading day, as in the live loop.
        let mut budgets: HashMap<NaiveDate, DailyBudget> = HashMap::new();

        for station in self.rules.stations() {
            let keys = self.store.cycle_keys_in_range(&station.code, from, to)?;
            for key in keys {
                let forecast: Option<ForecastSnapshot> =
                    self.store.get(&key, ArtifactKind::Forecast)?;
                let market: Option<MarketSnapshot> = self.store.get(&key, ArtifactKind::Market)?;
                let (forecast, market) = match (forecast, market) {
                    (Some(f), Some(m)) => (f, m),
                    _ => continue,
                };

                let trading_day = key.cycle_ts.date_naive();
                let budget = budgets
                    .entry(trading_day)
                    .or_insert_with(|| DailyBudget::new(self.caps.daily_budget_usd, trading_day));

                let decisions = match evaluate_cycle(
                    &self.rules,
                    station,
                    key.event_day,
                    key.cycle_ts,
                    &forecast,
                    &market,
                    &self.costs,
                    &self.caps,
                    budget,
                ) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(
                            station = %station.code,
                            cycle_ts = %key.cycle_ts,
                            "archived cycle failed to replay: {}", e
                        );
                        continue;
                    }
                };

                summary.cycles_replayed += 1;
                summary.decisions += decisions.len() as u64;

                let settlement = self.store.settlement_for(&station.code, key.event_day)?;

                for decision in decisions.iter().filter(|d| d.is_trade()) {
                    edge_sum += decision.edge;
                    summary.total_staked += decision.stake;

                    if let Some(observed_high) = settlement {
                        let won = decision.bracket.contains(observed_high);
                        let pnl = if won {
                            decision.stake / decision.market_mid - decision.stake
                        } else {
                            -decision.stake
                        };
                        settled_total += 1;
                        settled_staked += decision.stake;
                        settled_pnl += pnl;
                        if won {
                            settled_wins += 1;
                        }
                    }

                    trades.push(TradeRecord {
                        id: None,
                        station: station.code.clone(),
                        event_day: key.event_day,
                        settlement_id: decision.bracket.settlement_id.clone(),
                        price_id: decision.bracket.price_id.clone(),
                        price: decision.market_mid,
                        stake: decision.stake,
                        edge: decision.edge,
                        executed_at: key.cycle_ts,
                        mode: ExecutionMode::Backtest,
                    });
                }
            }
        }

        summary.trades = trades.len() as u64;
        if !trades.is_empty() {
            summary.avg_edge = edge_sum / trades.len() as f64;
        }
        if settled_total > 0 {
            summary.hit_rate = Some(settled_wins as f64 / settled_total as f64);
            if settled_staked > 0.0 {
                summary.roi = Some(settled_pnl / settled_staked);
            }
        }

        info!(
            cycles = summary.cycles_replayed,
            trades = summary.trades,
            total_staked = summary.total_staked,
            "backtest complete"
        );
        Ok((trades, summary))
    }
}
