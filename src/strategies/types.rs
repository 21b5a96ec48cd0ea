use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::data::types::MarketBracket;

/// Probability mass assigned to one bracket under the current forecast
/// distribution. Recomputed every cycle, persisted only as a timestamped
/// artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketProbability {
    pub bracket: MarketBracket,
    pub p_model: f64,
    pub sigma: f64,
}

/// Closed reason-code set. Not errors: a zero-stake decision is valuable
/// historical signal, so every reason is logged and snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionReason {
    BelowEdgeThreshold,
    KellyCapped,
    PerMarketCapped,
    LiquidityCapped,
    DailyBudgetCapped,
    FullKelly,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionReason::BelowEdgeThreshold => "below_edge_threshold",
            DecisionReason::KellyCapped => "kelly_capped",
            DecisionReason::PerMarketCapped => "per_market_capped",
            DecisionReason::LiquidityCapped => "liquidity_capped",
            DecisionReason::DailyBudgetCapped => "daily_budget_capped",
            DecisionReason::FullKelly => "full_kelly",
        };
        write!(f, "{}", s)
    }
}

/// Terminal artifact of the pipeline for one bracket in one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDecision {
    pub station: String,
    pub event_day: NaiveDate,
    pub bracket: MarketBracket,
    pub p_model: f64,
    pub delta_p: f64,
    pub p_adjusted: f64,
    pub market_mid: f64,
    pub edge: f64,
    pub kelly_fraction: f64,
    pub stake: f64,
    pub reason: DecisionReason,
    pub decided_at: DateTime<Utc>,
}

impl EdgeDecision {
    pub fn is_trade(&self) -> bool {
        self.stake > 0.0
    }
}
