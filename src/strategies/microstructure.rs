use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::data::types::{ObservationTrend, Station};
use crate::rules::{StationRule, VenueRule};

/// Minutes of lookahead within which a scheduled refresh counts as imminent.
const REFRESH_LOOKAHEAD_MIN: f64 = 10.0;

/// Trend strength below this is treated as noise, not sustained movement.
const MIN_TREND_STRENGTH: f64 = 0.2;

/// Base magnitude for the rounding-fragility term, scaled by the venue
/// overreaction factor and boundary proximity.
const BOUNDARY_BASE: f64 = 0.02;

/// Fallback cap when the venue rule is missing entirely.
const DEFAULT_CAP: f64 = 0.15;

/// Bounded additive correction anticipating mechanically predictable
/// near-term market moves.
///
/// Four independent components, purely additive, summed then clamped to
/// ±cap. The cap exists because this is a heuristic anticipatory correction,
/// not a re-derivation of probability; it must never dominate the model's
/// own estimate. Missing trend data or missing rules degrade each component
/// to zero, never to an error.
pub fn adjust(
    station: &Station,
    station_rule: Option<&StationRule>,
    venue_rule: Option<&VenueRule>,
    now: DateTime<Utc>,
    event_day: NaiveDate,
    bracket_temp: f64,
    trend: Option<&ObservationTrend>,
) -> f64 {
    let cap = venue_rule.map(|v| v.adjustment_cap).unwrap_or(DEFAULT_CAP);

    let sum = observation_refresh_component(station_rule, venue_rule, now, trend)
        + forecast_refresh_component(venue_rule, now, trend)
        + rounding_fragility_component(venue_rule, bracket_temp, trend)
        + cross_day_bleed_component(station, station_rule, now, event_day);

    sum.clamp(-cap, cap)
}

/// Anticipates the repricing that follows a scheduled observation publish.
/// Requires an imminent refresh and a sustained trend; the correction decays
/// linearly to zero as the refresh lands, since the market reprices at that
/// instant and the anticipation is spent.
fn observation_refresh_component(
    station_rule: Option<&StationRule>,
    venue_rule: Option<&VenueRule>,
    now: DateTime<Utc>,
    trend: Option<&ObservationTrend>,
) -> f64 {
    let (rule, venue, trend) = match (station_rule, venue_rule, trend) {
        (Some(r), Some(v), Some(t)) => (r, v, t),
        _ => return 0.0,
    };
    if trend.direction == 0 || trend.strength < MIN_TREND_STRENGTH {
        return 0.0;
    }
    let minutes_to = match minutes_to_next_refresh(now, &rule.obs_refresh_minutes) {
        Some(m) if m <= REFRESH_LOOKAHEAD_MIN => m,
        _ => return 0.0,
    };
    let decay = minutes_to / REFRESH_LOOKAHEAD_MIN;
    trend.direction as f64 * trend.strength.clamp(0.0, 1.0) * venue.obs_sensitivity * decay
}

/// Anticipates catch-up between this engine's model and the venue's
/// slower-reacting price around an upstream model refresh.
fn forecast_refresh_component(
    venue_rule: Option<&VenueRule>,
    now: DateTime<Utc>,
    trend: Option<&ObservationTrend>,
) -> f64 {
    let (venue, trend) = match (venue_rule, trend) {
        (Some(v), Some(t)) => (v, t),
        _ => return 0.0,
    };
    if trend.direction == 0 || trend.strength < MIN_TREND_STRENGTH {
        return 0.0;
    }
    let minutes_to =
        match minutes_to_next_refresh(now, std::slice::from_ref(&venue.forecast_refresh_minute)) {
            Some(m) if m <= REFRESH_LOOKAHEAD_MIN => m,
            _ => return 0.0,
        };
    let decay = minutes_to / REFRESH_LOOKAHEAD_MIN;
    trend.direction as f64 * venue.forecast_catchup * decay
}

/// Brackets whose temperature sits within tolerance of a .5 rounding
/// boundary are historically mispriced beyond what the model predicts.
fn rounding_fragility_component(
    venue_rule: Option<&VenueRule>,
    bracket_temp: f64,
    trend: Option<&ObservationTrend>,
) -> f64 {
    let (venue, trend) = match (venue_rule, trend) {
        (Some(v), Some(t)) => (v, t),
        _ => return 0.0,
    };
    if trend.direction == 0 || !bracket_temp.is_finite() {
        return 0.0;
    }
    let frac = bracket_temp - bracket_temp.floor();
    let dist = (frac - 0.5).abs();
    if dist > venue.rounding_tolerance {
        return 0.0;
    }
    let proximity = 1.0 - dist / venue.rounding_tolerance;
    trend.direction as f64 * BOUNDARY_BASE * venue.overreaction_factor * proximity
}

/// Early-morning confusion between an overnight residual high and the event
/// day's own high. Signed per-station bias, strongest at local midnight,
/// fading to zero at the cutoff hour. Only the event day's own morning
/// qualifies: a lookahead task for a future day carries no bleed.
fn cross_day_bleed_component(
    station: &Station,
    station_rule: Option<&StationRule>,
    now: DateTime<Utc>,
    event_day: NaiveDate,
) -> f64 {
    let rule = match station_rule {
        Some(r) if r.morning_bias != 0.0 && r.morning_cutoff_hour > 0 => r,
        _ => return 0.0,
    };
    if station.local_date(now) != event_day {
        return 0.0;
    }
    let hour = station.local_hour(now);
    if hour >= rule.morning_cutoff_hour {
        return 0.0;
    }
    let fade = 1.0 - hour as f64 / rule.morning_cutoff_hour as f64;
    rule.morning_bias * fade
}

/// Minutes until the next scheduled minute-of-hour, wrapping to the next
/// hour when all cadence points for this hour have passed.
fn minutes_to_next_refresh(now: DateTime<Utc>, refresh_minutes: &[u32]) -> Option<f64> {
    if refresh_minutes.is_empty() {
        return None;
    }
    let current = now.minute() as f64 + now.second() as f64 / 60.0;
    refresh_minutes
        .iter()
        .map(|&m| {
            let m = m as f64;
            if m >= current {
                m - current
            } else {
                m + 60.0 - current
            }
        })
        .fold(None, |acc: Option<f64>, d| {
            Some(acc.map_or(d, |a| a.min(d)))
        })
}
