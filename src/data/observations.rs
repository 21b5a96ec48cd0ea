use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::data::forecast_api::parse_rfc3339;
use crate::data::sources::ObservationSource;
use crate::data::types::{ObservationTrend, Station};

/// Slope (°/hour) at which trend strength saturates to 1.0.
const SATURATION_DEG_PER_HOUR: f64 = 2.0;

/// Slopes below this count as flat.
const FLAT_DEG_PER_HOUR: f64 = 0.3;

/// NWS-style latest-observations client.
pub struct NwsObservationSource {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    timestamp: String,
    temperature: f64,
}

impl NwsObservationSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl ObservationSource for NwsObservationSource {
    async fn recent_trend(
        &self,
        station: &Station,
        window_minutes: u32,
    ) -> Option<ObservationTrend> {
        let url = format!(
            "{}/stations/{}/observations?window_minutes={}",
            self.base_url, station.code, window_minutes
        );

        let response = self.client.get(&url).send().await.ok()?;
        let parsed: ObservationsResponse = response.json().await.ok()?;

        let samples: Vec<(DateTime<Utc>, f64)> = parsed
            .observations
            .iter()
            .filter_map(|o| parse_rfc3339(&o.timestamp).map(|t| (t, o.temperature)))
            .collect();

        let trend = compute_trend(&samples);
        if trend.is_none() {
            debug!(station = %station.code, "no usable observation trend");
        }
        trend
    }
}

/// Least-squares slope over a recent observation series, mapped to a signed
/// direction and a 0..1 strength. Fewer than three samples cannot support a
/// trend claim.
pub fn compute_trend(samples: &[(DateTime<Utc>, f64)]) -> Option<ObservationTrend> {
    if samples.len() < 3 {
        return None;
    }

    let t0 = samples[0].0;
    let xs: Vec<f64> = samples
        .iter()
        .map(|(t, _)| (*t - t0).num_seconds() as f64 / 3600.0)
        .collect();
    let ys: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let cov: f64 = xs
        .iter()
        .zip(ys.iter())
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let var: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if var == 0.0 {
        return None;
    }

    let slope = cov / var; // degrees per hour
    if !slope.is_finite() {
        return None;
    }

    let direction = if slope.abs() < FLAT_DEG_PER_HOUR {
        0
    } else if slope > 0.0 {
        1
    } else {
        -1
    };
    let strength = (slope.abs() / SATURATION_DEG_PER_HOUR).clamp(0.0, 1.0);

    Some(ObservationTrend {
        direction,
        strength,
    })
}
