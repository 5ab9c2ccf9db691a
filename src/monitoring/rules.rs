//! Rule condition evaluation
//!
//! Pure functions over a window of metric values, oldest first. Each
//! evaluator returns `Ok(Some(message))` when the rule fires, `Ok(None)`
//! when it passes, and `Err` for conditions that cannot be evaluated
//! (insufficient data, degenerate math). Callers treat errors as skips.

use statrs::statistics::Statistics;

use crate::error::CoreError;
use crate::types::{ForecastBound, RuleCondition, ThresholdOp, TrendDirection};

/// Evaluate `condition` against `values` (ascending by time). The window
/// must already be trimmed to the rule's reach; evaluators only check it is
/// long enough.
pub fn evaluate_window(
    condition: &RuleCondition,
    metric: &str,
    values: &[f64],
) -> Result<Option<String>, CoreError> {
    if values.len() < condition.min_points() {
        return Err(CoreError::Validation(format!(
            "{} points available, {} required for {:?} evaluation of '{metric}'",
            values.len(),
            condition.min_points(),
            condition.analysis_type(),
        )));
    }

    match condition {
        RuleCondition::Threshold { op, value } => evaluate_threshold(metric, values, *op, *value),
        RuleCondition::Trend {
            expected,
            min_change_percent,
            window,
        } => evaluate_trend(metric, values, *expected, *min_change_percent, *window),
        RuleCondition::Anomaly { z_threshold } => evaluate_anomaly(metric, values, *z_threshold),
        RuleCondition::Forecast {
            horizon_steps,
            alert_if,
            value,
        } => evaluate_forecast(metric, values, *horizon_steps, *alert_if, *value),
    }
}

fn evaluate_threshold(
    metric: &str,
    values: &[f64],
    op: ThresholdOp,
    threshold: f64,
) -> Result<Option<String>, CoreError> {
    let last = values[values.len() - 1];
    if last.is_nan() {
        return Err(CoreError::Validation(format!(
            "latest '{metric}' value is NaN"
        )));
    }
    if op.holds(last, threshold) {
        let op_str = match op {
            ThresholdOp::Lt => "<",
            ThresholdOp::Le => "<=",
            ThresholdOp::Eq => "=",
            ThresholdOp::Ge => ">=",
            ThresholdOp::Gt => ">",
        };
        Ok(Some(format!(
            "{metric} is {last} ({op_str} {threshold})"
        )))
    } else {
        Ok(None)
    }
}

fn evaluate_trend(
    metric: &str,
    values: &[f64],
    expected: TrendDirection,
    min_change_percent: f64,
    window: usize,
) -> Result<Option<String>, CoreError> {
    let window = window.max(3).min(values.len());
    let tail = &values[values.len() - window..];

    let first = tail[0];
    let last = tail[tail.len() - 1];
    if first.abs() < f64::EPSILON {
        return Err(CoreError::Validation(format!(
            "cannot compute percent change of '{metric}': window starts at zero"
        )));
    }
    let (slope, _) = linear_fit(tail);
    let change_percent = (last - first) / first.abs() * 100.0;
    if change_percent.is_nan() || slope.is_nan() {
        return Err(CoreError::Validation(format!(
            "trend math degenerate for '{metric}'"
        )));
    }

    let observed = if slope > 0.0 && change_percent.abs() >= min_change_percent {
        TrendDirection::Increasing
    } else if slope < 0.0 && change_percent.abs() >= min_change_percent {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    if observed == expected {
        Ok(Some(format!(
            "{metric} trending {observed:?} ({change_percent:+.1}% over {window} points)"
        )))
    } else {
        Ok(None)
    }
}

fn evaluate_anomaly(
    metric: &str,
    values: &[f64],
    z_threshold: f64,
) -> Result<Option<String>, CoreError> {
    let (head, tail) = values.split_at(values.len() - 1);
    let last = tail[0];
    let mean = head.iter().mean();
    let std_dev = head.iter().std_dev();
    if mean.is_nan() || std_dev.is_nan() {
        return Err(CoreError::Validation(format!(
            "anomaly baseline degenerate for '{metric}'"
        )));
    }
    let deviation = (last - mean).abs();
    if deviation > z_threshold * std_dev {
        let z = if std_dev > 0.0 {
            deviation / std_dev
        } else {
            f64::INFINITY
        };
        Ok(Some(format!(
            "{metric} is {last} — {z:.1}σ from rolling mean {mean:.2}"
        )))
    } else {
        Ok(None)
    }
}

fn evaluate_forecast(
    metric: &str,
    values: &[f64],
    horizon_steps: usize,
    alert_if: ForecastBound,
    threshold: f64,
) -> Result<Option<String>, CoreError> {
    let (slope, intercept) = linear_fit(values);
    if slope.is_nan() || intercept.is_nan() {
        return Err(CoreError::Validation(format!(
            "forecast fit degenerate for '{metric}'"
        )));
    }
    let projected_x = (values.len() - 1 + horizon_steps) as f64;
    let projected = slope * projected_x + intercept;

    let violates = match alert_if {
        ForecastBound::Below => projected < threshold,
        ForecastBound::Above => projected > threshold,
    };
    if violates {
        Ok(Some(format!(
            "{metric} projected to {projected:.2} in {horizon_steps} steps ({alert_if:?} {threshold})"
        )))
    } else {
        Ok(None)
    }
}

/// Least-squares line over `values` with x = 0..n-1.
///
/// Returns `(slope, intercept)`. A single point yields slope 0.
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, values.first().copied().unwrap_or(0.0));
    }
    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator == 0.0 {
        return (0.0, sum_y / n);
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}
