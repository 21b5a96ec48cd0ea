use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;

use crate::data::sources::MarketSource;
use crate::data::types::{MarketBracket, MarketQuote, Station};
use crate::error::EngineError;

/// Venue market-discovery and pricing client.
///
/// Discovery walks the venue's event listing for a station/day and parses
/// the bracket bounds out of each outcome title. Settlement and price
/// identifiers come back on different fields and stay separate all the way
/// through.
pub struct BracketMarketSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(default)]
    markets: Vec<EventMarket>,
}

#[derive(Debug, Deserialize)]
struct EventMarket {
    /// Resolves the winning outcome.
    condition_id: String,
    /// Prices the outcome. Not interchangeable with `condition_id`.
    token_id: String,
    title: String,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    mid: f64,
    #[serde(default)]
    bid_depth: f64,
    #[serde(default)]
    ask_depth: f64,
}

impl BracketMarketSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl MarketSource for BracketMarketSource {
    async fn discover_brackets(
        &self,
        station: &Station,
        event_day: NaiveDate,
    ) -> Result<Vec<MarketBracket>, EngineError> {
        let url = format!(
            "{}/events/highest-temperature?station={}&date={}",
            self.base_url, station.code, event_day
        );

        let response: EventResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("discovery request: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("discovery decode: {}", e)))?;

        let mut brackets: Vec<MarketBracket> = response
            .markets
            .into_iter()
            .filter(|m| !m.closed)
            .filter_map(|m| {
                parse_bracket_title(&m.title).map(|(lower, upper)| MarketBracket {
                    lower,
                    upper,
                    settlement_id: m.condition_id,
                    price_id: m.token_id,
                })
            })
            .collect();

        if brackets.is_empty() {
            return Err(EngineError::NoMarketsOpen {
                station: station.code.clone(),
                event_day,
            });
        }

        brackets.sort_by(|a, b| a.lower.partial_cmp(&b.lower).unwrap());
        Ok(brackets)
    }

    async fn quote(&self, price_id: &str) -> Result<MarketQuote, EngineError> {
        let url = format!("{}/prices/{}", self.base_url, price_id);

        let response: QuoteResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("quote request: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("quote decode: {}", e)))?;

        Ok(MarketQuote {
            price_id: price_id.to_string(),
            mid: response.mid,
            bid_depth: response.bid_depth,
            ask_depth: response.ask_depth,
        })
    }
}

/// Extract `[lower, upper)` from an outcome title.
///
/// Recognized shapes: "50-51°F", "50 to 51°F", "49°F or below",
/// "55°F or above". Venue titles label inclusive integer ranges, so
/// "50-51" covers settlement values 50 and 51: half-open [50, 52).
pub fn parse_bracket_title(title: &str) -> Option<(f64, f64)> {
    let range = Regex::new(r"(-?\d+)\s*(?:-|to)\s*(-?\d+)\s*°?[FC]?").unwrap();
    let below = Regex::new(r"(-?\d+)\s*°?[FC]?\s*or\s*(?:below|lower|less)").unwrap();
    let above = Regex::new(r"(-?\d+)\s*°?[FC]?\s*or\s*(?:above|higher|more)").unwrap();

    if let Some(cap) = below.captures(title) {
        let upper: f64 = cap[1].parse().ok()?;
        return Some((f64::NEG_INFINITY, upper + 1.0));
    }
    if let Some(cap) = above.captures(title) {
        let lower: f64 = cap[1].parse().ok()?;
        return Some((lower, f64::INFINITY));
    }
    if let Some(cap) = range.captures(title) {
        let lower: f64 = cap[1].parse().ok()?;
        let upper: f64 = cap[2].parse().ok()?;
        if lower <= upper {
            return Some((lower, upper + 1.0));
        }
    }
    None
}
