use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempUnit {
    Fahrenheit,
    Celsius,
}

impl TempUnit {
    /// Convert a value expressed in `self` into `target`.
    pub fn convert(&self, value: f64, target: TempUnit) -> f64 {
        match (self, target) {
            (TempUnit::Fahrenheit, TempUnit::Celsius) => (value - 32.0) * 5.0 / 9.0,
            (TempUnit::Celsius, TempUnit::Fahrenheit) => value * 9.0 / 5.0 + 32.0,
            _ => value,
        }
    }
}

/// Immutable station reference data, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub code: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
    /// IANA zone name, informational only.
    pub timezone: String,
    /// Fixed offset used for local-hour math (DST precision not required).
    pub utc_offset_hours: i32,
    pub venue: String,
}

impl Station {
    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        let shifted = now + chrono::Duration::hours(self.utc_offset_hours as i64);
        use chrono::Timelike;
        shifted.hour()
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        (now + chrono::Duration::hours(self.utc_offset_hours as i64)).date_naive()
    }
}

/// Hourly temperature timeseries for one station/event-day, tagged with the
/// wall-clock time it was fetched. Immutable after creation; persisted
/// verbatim so the backtester can replay the cycle that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub station: String,
    pub event_day: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub unit: TempUnit,
    pub times: Vec<DateTime<Utc>>,
    pub temps: Vec<f64>,
}

impl ForecastSnapshot {
    pub fn len(&self) -> usize {
        self.temps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temps.is_empty()
    }
}

/// One tradable half-open temperature interval `[lower, upper)`.
///
/// `settlement_id` and `price_id` are distinct venue identifiers. The first
/// resolves the winning outcome, the second prices it. They are never
/// interchangeable; conflating them silently breaks pricing calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBracket {
    /// `f64::NEG_INFINITY` for an open low tail.
    #[serde(with = "bracket_bound")]
    pub lower: f64,
    /// `f64::INFINITY` for an open high tail.
    #[serde(with = "bracket_bound")]
    pub upper: f64,
    pub settlement_id: String,
    pub price_id: String,
}

/// JSON has no infinities; serde_json would write them as null and the
/// archived bracket could never be read back. Open tails go over the wire
/// as the strings "-inf" / "inf" instead.
mod bracket_bound {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Bound {
        Finite(f64),
        Open(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if *value == f64::INFINITY {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Bound::deserialize(deserializer)? {
            Bound::Finite(v) => Ok(v),
            Bound::Open(s) => match s.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("bad bracket bound: {}", other))),
            },
        }
    }
}

impl MarketBracket {
    pub fn is_low_tail(&self) -> bool {
        self.lower == f64::NEG_INFINITY
    }

    pub fn is_high_tail(&self) -> bool {
        self.upper == f64::INFINITY
    }

    /// Representative temperature for microstructure checks: the midpoint,
    /// or the finite bound for open-ended tails.
    pub fn representative_temp(&self) -> f64 {
        match (self.is_low_tail(), self.is_high_tail()) {
            (true, true) => 0.0,
            (true, false) => self.upper,
            (false, true) => self.lower,
            (false, false) => (self.lower + self.upper) / 2.0,
        }
    }

    pub fn contains(&self, temp: f64) -> bool {
        temp >= self.lower && temp < self.upper
    }
}

/// Market quote, mid interpreted directly as venue-implied probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub price_id: String,
    pub mid: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
}

/// Recent directional movement in ground-truth observations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ObservationTrend {
    /// -1 falling, 0 flat, +1 rising.
    pub direction: i8,
    /// Normalized 0..1.
    pub strength: f64,
}

/// Everything market-shaped a cycle fetched, persisted as one artifact so a
/// replay sees exactly what the live task saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub brackets: Vec<MarketBracket>,
    pub quotes: Vec<MarketQuote>,
    pub trend: Option<ObservationTrend>,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn quote_for(&self, price_id: &str) -> Option<&MarketQuote> {
        self.quotes.iter().find(|q| q.price_id == price_id)
    }
}
