use async_trait::async_trait;
use chrono::NaiveDate;

use crate::data::types::{
    ForecastSnapshot, MarketBracket, MarketQuote, ObservationTrend, Station,
};
use crate::error::EngineError;

/// Hourly forecast provider. Implementations own retry/backoff; the engine
/// only observes success or failure per task.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch(
        &self,
        station: &Station,
        event_day: NaiveDate,
        hours: u32,
    ) -> Result<ForecastSnapshot, EngineError>;
}

/// Market discovery and pricing. Bracket discovery and quoting are separate
/// calls because the venue keys them by different identifiers.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn discover_brackets(
        &self,
        station: &Station,
        event_day: NaiveDate,
    ) -> Result<Vec<MarketBracket>, EngineError>;

    async fn quote(&self, price_id: &str) -> Result<MarketQuote, EngineError>;
}

/// Recent ground-truth observation trend. Optional input: absence degrades
/// the microstructure adjustment gracefully, so this returns `None` rather
/// than an error on any failure.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn recent_trend(&self, station: &Station, window_minutes: u32)
        -> Option<ObservationTrend>;
}
