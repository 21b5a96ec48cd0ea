use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::data::types::{Station, TempUnit};

/// Per-station behavioral parameters. Read-only during a cycle; the
/// registry may be reloaded between cycles but never mid-cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct StationRule {
    pub station: String,
    /// True when the venue settles against the *rounded* observed
    /// temperature. μ must then be rounded before bracket masses are
    /// computed, because the market resolves on the rounded value.
    #[serde(default)]
    pub uses_double_rounding: bool,
    /// Minutes of the hour when ground-truth observations publish.
    #[serde(default = "default_obs_refresh_minutes")]
    pub obs_refresh_minutes: Vec<u32>,
    #[serde(default = "default_sigma_min")]
    pub sigma_min: f64,
    #[serde(default = "default_sigma_max")]
    pub sigma_max: f64,
    /// Signed Δp applied in the early local morning of the event day.
    #[serde(default)]
    pub morning_bias: f64,
    #[serde(default = "default_morning_cutoff_hour")]
    pub morning_cutoff_hour: u32,
    /// Overrides the venue minimum edge when set.
    #[serde(default)]
    pub min_edge: Option<f64>,
}

fn default_obs_refresh_minutes() -> Vec<u32> {
    vec![20, 50]
}
fn default_sigma_min() -> f64 {
    1.0
}
fn default_sigma_max() -> f64 {
    6.0
}
fn default_morning_cutoff_hour() -> u32 {
    6
}

impl StationRule {
    /// Fallback for stations with no explicit entry: no double rounding,
    /// standard cadence, conservative σ clamp, no morning bias.
    pub fn default_for(station: &str) -> Self {
        Self {
            station: station.to_string(),
            uses_double_rounding: false,
            obs_refresh_minutes: default_obs_refresh_minutes(),
            sigma_min: default_sigma_min(),
            sigma_max: default_sigma_max(),
            morning_bias: 0.0,
            morning_cutoff_hour: default_morning_cutoff_hour(),
            min_edge: None,
        }
    }
}

/// Per-venue behavioral parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueRule {
    pub venue: String,
    #[serde(default = "default_bracket_unit")]
    pub bracket_unit: TempUnit,
    /// Scales the observation-refresh correction.
    #[serde(default = "default_obs_sensitivity")]
    pub obs_sensitivity: f64,
    /// Scales the forecast-refresh catch-up correction.
    #[serde(default = "default_forecast_catchup")]
    pub forecast_catchup: f64,
    /// Minute of the hour the upstream weather model refreshes.
    #[serde(default)]
    pub forecast_refresh_minute: u32,
    /// Historical overreaction multiplier near .5 rounding boundaries.
    #[serde(default = "default_overreaction_factor")]
    pub overreaction_factor: f64,
    /// Degrees within a .5 boundary that count as fragile.
    #[serde(default = "default_rounding_tolerance")]
    pub rounding_tolerance: f64,
    /// Hard bound on the summed adjustment magnitude.
    #[serde(default = "default_adjustment_cap")]
    pub adjustment_cap: f64,
    #[serde(default = "default_min_edge")]
    pub min_edge: f64,
}

fn default_bracket_unit() -> TempUnit {
    TempUnit::Fahrenheit
}
fn default_obs_sensitivity() -> f64 {
    0.05
}
fn default_forecast_catchup() -> f64 {
    0.03
}
fn default_overreaction_factor() -> f64 {
    1.5
}
fn default_rounding_tolerance() -> f64 {
    0.15
}
fn default_adjustment_cap() -> f64 {
    0.15
}
fn default_min_edge() -> f64 {
    0.05
}

impl VenueRule {
    pub fn default_for(venue: &str) -> Self {
        Self {
            venue: venue.to_string(),
            bracket_unit: default_bracket_unit(),
            obs_sensitivity: default_obs_sensitivity(),
            forecast_catchup: default_forecast_catchup(),
            forecast_refresh_minute: 0,
            overreaction_factor: default_overreaction_factor(),
            rounding_tolerance: default_rounding_tolerance(),
            adjustment_cap: default_adjustment_cap(),
            min_edge: default_min_edge(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    stations: Vec<Station>,
    #[serde(default)]
    station_rules: Vec<StationRule>,
    #[serde(default)]
    venue_rules: Vec<VenueRule>,
}

/// Static lookup of station reference data plus station/venue rules.
/// Pure lookup, no external calls.
#[derive(Debug, Clone)]
pub struct RulesRegistry {
    stations: Vec<Station>,
    station_rules: HashMap<String, StationRule>,
    venue_rules: HashMap<String, VenueRule>,
}

impl RulesRegistry {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {}", path))?;
        let parsed: RulesFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse rules file: {}", path))?;
        Ok(Self::from_parts(
            parsed.stations,
            parsed.station_rules,
            parsed.venue_rules,
        ))
    }

    pub fn from_parts(
        stations: Vec<Station>,
        station_rules: Vec<StationRule>,
        venue_rules: Vec<VenueRule>,
    ) -> Self {
        Self {
            stations,
            station_rules: station_rules
                .into_iter()
                .map(|r| (r.station.clone(), r))
                .collect(),
            venue_rules: venue_rules
                .into_iter()
                .map(|r| (r.venue.clone(), r))
                .collect(),
        }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, code: &str) -> Option<&Station> {
        self.stations.iter().find(|s| s.code == code)
    }

    pub fn station_rule(&self, code: &str) -> Option<&StationRule> {
        self.station_rules.get(code)
    }

    pub fn venue_rule(&self, venue: &str) -> Option<&VenueRule> {
        self.venue_rules.get(venue)
    }

    /// Rule for a station, falling back to defaults when unconfigured.
    pub fn station_rule_or_default(&self, code: &str) -> StationRule {
        self.station_rules
            .get(code)
            .cloned()
            .unwrap_or_else(|| StationRule::default_for(code))
    }

    pub fn venue_rule_or_default(&self, venue: &str) -> VenueRule {
        self.venue_rules
            .get(venue)
            .cloned()
            .unwrap_or_else(|| VenueRule::default_for(venue))
    }

    /// Station override wins, then venue, then the global default.
    pub fn effective_min_edge(&self, station: &str, venue: &str, global_default: f64) -> f64 {
        if let Some(rule) = self.station_rules.get(station) {
            if let Some(min_edge) = rule.min_edge {
                return min_edge;
            }
        }
        self.venue_rules
            .get(venue)
            .map(|v| v.min_edge)
            .unwrap_or(global_default)
    }
}
