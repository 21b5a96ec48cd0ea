use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Append-only ledger entry for a placed stake. Never mutated after
/// creation; settlement appends an outcome record instead of rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub station: String,
    pub event_day: NaiveDate,
    pub settlement_id: String,
    pub price_id: String,
    pub price: f64,
    pub stake: f64,
    pub edge: f64,
    pub executed_at: DateTime<Utc>,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
    Backtest,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Paper => write!(f, "paper"),
            ExecutionMode::Live => write!(f, "live"),
            ExecutionMode::Backtest => write!(f, "backtest"),
        }
    }
}

/// Settlement result appended to a trade once the day's high is known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: i64,
    pub won: bool,
    pub pnl: f64,
    pub resolved_at: DateTime<Utc>,
}
