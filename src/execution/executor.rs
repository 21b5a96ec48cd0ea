use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::sync::Mutex;
use tracing::info;

use crate::execution::types::{ExecutionMode, TradeRecord};
use crate::strategies::types::EdgeDecision;

/// Abstracts paper vs. live placement; the decision pipeline is indifferent
/// to which is wired in.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn place(&self, decision: &EdgeDecision) -> Result<TradeRecord>;
    fn mode(&self) -> ExecutionMode;
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_fill_rate")]
    pub fill_rate: f64,
    #[serde(default = "default_slippage")]
    pub slippage_pct: f64,
    #[serde(default = "default_balance")]
    pub initial_balance_usd: f64,
}

fn default_fill_rate() -> f64 {
    0.70
}
fn default_slippage() -> f64 {
    0.005
}
fn default_balance() -> f64 {
    2000.0
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fill_rate: default_fill_rate(),
            slippage_pct: default_slippage(),
            initial_balance_usd: default_balance(),
        }
    }
}

/// Simulated execution with random fills and slippage, tracking a paper
/// balance.
pub struct PaperExecutor {
    config: PaperConfig,
    balance: Mutex<f64>,
}

impl PaperExecutor {
    pub fn new(config: PaperConfig) -> Self {
        let balance = config.initial_balance_usd;
        info!("Paper executor initialized with ${:.2}", balance);
        Self {
            config,
            balance: Mutex::new(balance),
        }
    }

    pub fn balance(&self) -> f64 {
        *self.balance.lock().unwrap()
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    async fn place(&self, decision: &EdgeDecision) -> Result<TradeRecord> {
        let (will_fill, slippage) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen::<f64>() < self.config.fill_rate,
                rng.gen::<f64>() * self.config.slippage_pct,
            )
        };

        if !will_fill {
            bail!("order not filled (simulated rejection)");
        }

        let executed_price = (decision.market_mid * (1.0 + slippage)).min(0.999);

        {
            let mut balance = self.balance.lock().unwrap();
            if decision.stake > *balance {
                bail!(
                    "insufficient paper balance: need ${:.2}, have ${:.2}",
                    decision.stake,
                    *balance
                );
            }
            *balance -= decision.stake;
        }

        info!(
            station = %decision.station,
            stake = decision.stake,
            price = executed_price,
            "paper fill"
        );

        Ok(TradeRecord {
            id: None,
            station: decision.station.clone(),
            event_day: decision.event_day,
            settlement_id: decision.bracket.settlement_id.clone(),
            price_id: decision.bracket.price_id.clone(),
            price: executed_price,
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
