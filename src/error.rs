use chrono::NaiveDate;

/// Engine-level error taxonomy.
///
/// The first three variants are contract violations: they indicate a bug in
/// an upstream collaborator and must surface loudly. The last two are
/// transient, expected conditions that skip a single task without touching
/// its siblings.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid forecast: {0}")]
    InvalidForecast(String),

    #[error("invalid bracket set: {0}")]
    InvalidBracketSet(String),

    #[error("invalid quote: mid price {0} outside (0, 1)")]
    InvalidQuote(f64),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("no markets open for {station} on {event_day}")]
    NoMarketsOpen { station: String, event_day: NaiveDate },
}

impl EngineError {
    /// Transient errors skip the task; contract violations fail it loudly.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::FetchFailed(_) | EngineError::NoMarketsOpen { .. }
        )
    }
}
