use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Mutex;

use crate::data::types::{MarketBracket, MarketQuote};
use crate::error::EngineError;
use crate::strategies::types::{DecisionReason, EdgeDecision};

/// Transaction-cost assumptions subtracted from raw edge.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CostConfig {
    pub fee_rate: f64,
    pub slippage_rate: f64,
}

/// Capital constraints applied to every stake.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CapConfig {
    pub bankroll_usd: f64,
    pub kelly_cap: f64,
    pub per_market_cap_usd: f64,
    pub daily_budget_usd: f64,
    /// Global default; station/venue rules may override per market.
    pub edge_min: f64,
}

/// Shared remaining budget for one calendar trading day.
///
/// The single piece of mutable cross-call state in the pipeline. The
/// decrement happens atomically inside `try_reserve` at the moment a stake
/// is finalized, so two concurrently evaluated brackets can never both see
/// the same remaining budget and jointly overspend it.
pub struct DailyBudget {
    daily_cap: f64,
    state: Mutex<BudgetState>,
}

struct BudgetState {
    day: NaiveDate,
    remaining: f64,
}

impl DailyBudget {
    pub fn new(daily_cap: f64, day: NaiveDate) -> Self {
        Self {
            daily_cap,
            state: Mutex::new(BudgetState {
                day,
                remaining: daily_cap,
            }),
        }
    }

    /// Atomically grant up to `amount`, rolling the budget over when the
    /// trading day changes. Returns the granted amount.
    pub fn try_reserve(&self, today: NaiveDate, amount: f64) -> f64 {
        let mut state = self.state.lock().unwrap();
        if state.day != today {
            state.day = today;
            state.remaining = self.daily_cap;
        }
        let granted = amount.max(0.0).min(state.remaining);
        state.remaining -= granted;
        granted
    }

    /// Undo a reservation whose order placement failed, so a venue
    /// rejection does not burn daily capacity.
    pub fn release(&self, today: NaiveDate, amount: f64) {
        let mut state = self.state.lock().unwrap();
        if state.day == today {
            state.remaining = (state.remaining + amount).min(self.daily_cap);
        }
    }

    pub fn remaining(&self, today: NaiveDate) -> f64 {
        let mut state = self.state.lock().unwrap();
        if state.day != today {
            state.day = today;
            state.remaining = self.daily_cap;
        }
        state.remaining
    }
}

const BIND_EPS: f64 = 1e-9;

/// Combine adjusted probability, a market quote, cost assumptions, and the
/// capital constraints into a final stake decision with a reason code.
#[allow(clippy::too_many_arguments)]
pub fn decide(
    station: &str,
    event_day: NaiveDate,
    bracket: &MarketBracket,
    p_model: f64,
    delta_p: f64,
    quote: &MarketQuote,
    costs: &CostConfig,
    caps: &CapConfig,
    edge_min: f64,
    budget: &DailyBudget,
    now: DateTime<Utc>,
) -> Result<EdgeDecision, EngineError> {
    if quote.mid <= 0.0 || quote.mid >= 1.0 {
        return Err(EngineError::InvalidQuote(quote.mid));
    }

    let p_adjusted = (p_model + delta_p).clamp(0.0, 1.0);
    let edge = (p_adjusted - quote.mid) - costs.fee_rate - costs.slippage_rate;

    let base = EdgeDecision {
        station: station.to_string(),
        event_day,
        bracket: bracket.clone(),
        p_model,
        delta_p,
        p_adjusted,
        market_mid: quote.mid,
        edge,
        kelly_fraction: 0.0,
        stake: 0.0,
        reason: DecisionReason::BelowEdgeThreshold,
        decided_at: now,
    };

    if edge < edge_min {
        return Ok(base);
    }

    // Binary bet at decimal odds b = 1/mid - 1
    let b = 1.0 / quote.mid - 1.0;
    let q = 1.0 - p_adjusted;
    let kelly_fraction = ((b * p_adjusted - q) / b).max(0.0);

    let full_kelly = kelly_fraction * caps.bankroll_usd;
    let kelly_capped = caps.kelly_cap * caps.bankroll_usd;
    // Entering at the ask: available liquidity is ask depth. Zero or
    // negative depth means no liquidity, not an error.
    let liquidity = quote.ask_depth.max(0.0);

    let pre_budget = full_kelly
        .min(kelly_capped)
        .min(caps.per_market_cap_usd)
        .min(liquidity);

    // The budget decrement is the finalization point; everything above is
    // side-effect free.
    let today = now.date_naive();
    let granted = budget.try_reserve(today, pre_budget);

    let reason = if granted + BIND_EPS < pre_budget {
        DecisionReason::DailyBudgetCapped
    } else if full_kelly <= pre_budget + BIND_EPS {
        DecisionReason::FullKelly
    } else if kelly_capped <= pre_budget + BIND_EPS {
        DecisionReason::KellyCapped
    } else if caps.per_market_cap_usd <= pre_budget + BIND_EPS {
        DecisionReason::PerMarketCapped
    } else {
        DecisionReason::LiquidityCapped
    };

    Ok(EdgeDecision {
        kelly_fraction,
        stake: granted,
        reason,
        ..base
    })
}
