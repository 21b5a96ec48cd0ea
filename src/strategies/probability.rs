use crate::data::types::{ForecastSnapshot, MarketBracket, TempUnit};
use crate::error::EngineError;
use crate::rules::StationRule;
use crate::strategies::types::BracketProbability;

/// Fewer hourly points than this cannot support a daily-high estimate.
pub const MIN_FORECAST_HOURS: usize = 6;

/// Hours either side of the peak used for the dispersion estimate.
const PEAK_WINDOW_HOURS: usize = 3;

/// Map an hourly forecast onto a probability-per-bracket distribution for
/// the daily high.
///
/// μ is the maximum of the hourly series in the bracket unit. When the
/// station settles on double rounding, μ is rounded to the nearest whole
/// degree *before* masses are computed: the market resolves against the
/// rounded observation, not the continuous forecast, and using the raw μ
/// systematically misprices brackets adjacent to rounding boundaries.
pub fn map(
    forecast: &ForecastSnapshot,
    brackets: &[MarketBracket],
    rule: &StationRule,
    bracket_unit: TempUnit,
) -> Result<Vec<BracketProbability>, EngineError> {
    if forecast.len() < MIN_FORECAST_HOURS {
        return Err(EngineError::InvalidForecast(format!(
            "{} hourly points, need at least {}",
            forecast.len(),
            MIN_FORECAST_HOURS
        )));
    }
    validate_brackets(brackets)?;

    let temps: Vec<f64> = forecast
        .temps
        .iter()
        .map(|t| forecast.unit.convert(*t, bracket_unit))
        .collect();

    let (peak_idx, raw_mu) = temps
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });

    let sigma = peak_dispersion(&temps, peak_idx).clamp(rule.sigma_min, rule.sigma_max);

    let mu = if rule.uses_double_rounding {
        raw_mu.round()
    } else {
        raw_mu
    };

    Ok(brackets
        .iter()
        .map(|b| BracketProbability {
            bracket: b.clone(),
            p_model: bracket_mass(b, mu, sigma),
            sigma,
        })
        .collect())
}

/// Mass for `[a, b)` under N(μ, σ²). Open-ended tails evaluate one-sided.
fn bracket_mass(bracket: &MarketBracket, mu: f64, sigma: f64) -> f64 {
    let upper = if bracket.is_high_tail() {
        1.0
    } else {
        normal_cdf((bracket.upper - mu) / sigma)
    };
    let lower = if bracket.is_low_tail() {
        0.0
    } else {
        normal_cdf((bracket.lower - mu) / sigma)
    };
    (upper - lower).max(0.0)
}

/// Dispersion of the hourly series around its peak: RMS deviation from the
/// peak value over a small window centered on it. Narrow afternoon plateaus
/// produce tight σ, spiky series produce wide σ.
fn peak_dispersion(temps: &[f64], peak_idx: usize) -> f64 {
    let peak = temps[peak_idx];
    let lo = peak_idx.saturating_sub(PEAK_WINDOW_HOURS);
    let hi = (peak_idx + PEAK_WINDOW_HOURS + 1).min(temps.len());
    let window = &temps[lo..hi];
    let sq_sum: f64 = window.iter().map(|t| (peak - t).powi(2)).sum();
    (sq_sum / window.len() as f64).sqrt()
}

fn validate_brackets(brackets: &[MarketBracket]) -> Result<(), EngineError> {
    if brackets.is_empty() {
        return Err(EngineError::InvalidBracketSet("empty bracket set".into()));
    }
    for b in brackets {
        if b.lower >= b.upper {
            return Err(EngineError::InvalidBracketSet(format!(
                "degenerate bracket [{}, {})",
                b.lower, b.upper
            )));
        }
    }
    for pair in brackets.windows(2) {
        if pair[1].lower < pair[0].lower {
            return Err(EngineError::InvalidBracketSet("brackets unsorted".into()));
        }
        if pair[1].lower < pair[0].upper {
            return Err(EngineError::InvalidBracketSet(format!(
                "brackets overlap: [{}, {}) and [{}, {})",
                pair[0].lower, pair[0].upper, pair[1].lower, pair[1].upper
            )));
        }
    }
    Ok(())
}

/// Standard normal cumulative distribution function.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Error function approximation (Abramowitz & Stegun).
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
