use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::engine::backtest::BacktestConfig;
use crate::execution::executor::PaperConfig;
use crate::execution::types::ExecutionMode;
use crate::strategies::sizing::{CapConfig, CostConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub engine: EngineConfig,
    pub costs: CostConfig,
    pub caps: CapConfig,
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub database_path: String,
    pub rules_path: String,
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub interval_secs: u64,
    pub lookahead_days: u32,
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub forecast_hours: u32,
    pub trend_window_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub csv_logging: bool,
    pub csv_log_path: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.task_timeout_secs >= self.engine.interval_secs {
            anyhow::bail!(
                "task_timeout_secs ({}) must be shorter than interval_secs ({})",
                self.engine.task_timeout_secs,
                self.engine.interval_secs
            );
        }
        if self.caps.kelly_cap <= 0.0 || self.caps.kelly_cap > 1.0 {
            anyhow::bail!("kelly_cap must be in (0, 1]");
        }
        if self.caps.bankroll_usd <= 0.0 {
            anyhow::bail!("bankroll_usd must be positive");
        }
        Ok(())
    }
}

/// API base URLs, overridable via environment. These never reach the core
/// components; they only configure the collaborator clients.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub forecast_base_url: String,
    pub market_base_url: String,
    pub observation_base_url: String,
}

impl EnvConfig {
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            forecast_base_url: std::env::var("FORECAST_BASE_URL")
                .unwrap_or_else(|_| "https://api.open-meteo.com".to_string()),
            market_base_url: std::env::var("MARKET_BASE_URL")
                .unwrap_or_else(|_| "https://api.bracketmarkets.example".to_string()),
            observation_base_url: std::env::var("OBSERVATION_BASE_URL")
                .unwrap_or_else(|_| "https://api.weather.gov".to_string()),
        }
    }
}
