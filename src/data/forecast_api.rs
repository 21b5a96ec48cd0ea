use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::data::sources::ForecastSource;
use crate::data::types::{ForecastSnapshot, Station, TempUnit};
use crate::error::EngineError;

/// Open-Meteo hourly forecast client.
pub struct OpenMeteoSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
}

impl OpenMeteoSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoSource {
    async fn fetch(
        &self,
        station: &Station,
        event_day: NaiveDate,
        hours: u32,
    ) -> Result<ForecastSnapshot, EngineError> {
        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&hourly=temperature_2m&temperature_unit=fahrenheit&start_date={}&end_date={}",
            self.base_url, station.lat, station.lon, event_day, event_day
        );

        let response: OpenMeteoResponse = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("forecast request: {}", e)))?
            .json()
            .await
            .map_err(|e| EngineError::FetchFailed(format!("forecast decode: {}", e)))?;

        let mut times = Vec::new();
        let mut temps = Vec::new();
        for (t, temp) in response
            .hourly
            .time
            .iter()
            .zip(response.hourly.temperature_2m.iter())
            .take(hours as usize)
        {
            // Open-Meteo returns local ISO stamps without an offset.
            let naive = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M")
                .map_err(|e| EngineError::FetchFailed(format!("forecast timestamp {}: {}", t, e)))?;
            let utc = (naive - chrono::Duration::hours(station.utc_offset_hours as i64)).and_utc();
            times.push(utc);
            temps.push(*temp);
        }

        if (temps.len() as u32) < hours {
            warn!(
                station = %station.code,
                requested = hours,
                received = temps.len(),
                "partial forecast coverage"
            );
        }

        Ok(ForecastSnapshot {
            station: station.code.clone(),
            event_day,
            fetched_at: Utc::now(),
            unit: TempUnit::Fahrenheit,
            times,
            temps,
        })
    }
}

/// Parse an RFC 3339 stamp as the observation APIs return them.
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_meteo_payload() {
        let body = r#"{
            "hourly": {
                "time": ["2026-03-10T00:00", "2026-03-10T01:00"],
                "temperature_2m": [41.2, 40.8]
            }
        }"#;
        let parsed: OpenMeteoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.hourly.time.len(), 2);
        assert!((parsed.hourly.temperature_2m[0] - 41.2).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rfc3339() {
        let dt = parse_rfc3339("2026-03-10T14:51:00+00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-03-10T14:51:00+00:00");
        assert!(parse_rfc3339("garbage").is_none());
    }
}
