//! Naive linear-trend extrapolation over stored AQI history.
//!
//! Fits `aqi = slope * x + intercept` by ordinary least squares, with
//! `x = 0..n-1` over the readings in chronological order, then evaluates
//! the line at `x = n + k` for the k-th hour ahead.

use chrono::{DateTime, Duration, Utc};

use crate::types::{AirError, Reading, TrendPoint};

pub const DEFAULT_HOURS_AHEAD: u32 = 6;

/// Upper bound accepted from callers for `hours_ahead`.
pub const MAX_HOURS_AHEAD: u32 = 72;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Least-squares line through `(i, values[i])`. `None` for fewer than two values.
pub fn fit_line(values: &[f64]) -> Option<LinearFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }

    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }

    let slope = sxy / sxx;
    Some(LinearFit { slope, intercept: mean_y - slope * mean_x })
}

/// Extrapolate `hours_ahead` hourly values from `history`, stamped from now.
pub fn forecast(history: &[Reading], hours_ahead: u32) -> Result<Vec<TrendPoint>, AirError> {
    forecast_at(history, hours_ahead, Utc::now())
}

/// As [`forecast`], with an explicit reference time.
///
/// `history` may be in any order. Readings without an AQI are skipped.
pub fn forecast_at(
    history: &[Reading],
    hours_ahead: u32,
    now: DateTime<Utc>,
) -> Result<Vec<TrendPoint>, AirError> {
    let mut usable: Vec<(DateTime<Utc>, f64)> = history
        .iter()
        .filter_map(|r| r.aqi.map(|aqi| (r.timestamp, aqi as f64)))
        .collect();
    usable.sort_by_key(|(ts, _)| *ts);

    let values: Vec<f64> = usable.into_iter().map(|(_, v)| v).collect();
    let fit = fit_line(&values).ok_or_else(|| {
        AirError::InsufficientData(format!(
            "need at least 2 readings with an AQI, have {}",
            values.len()
        ))
    })?;

    let n = values.len() as f64;
    Ok((1..=hours_ahead)
        .map(|k| {
            let x = n + k as f64;
            TrendPoint {
                hour: k,
                timestamp: now + Duration::hours(k as i64),
                predicted_aqi: round2(fit.at(x).max(0.0)),
            }
        })
        .collect())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
