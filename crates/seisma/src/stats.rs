//! Statistics across realizations.
//!
//! Every realization produces one value per output point (a probability of
//! exceedance per site and level, for instance).  The statistics below are
//! computed point by point across realizations, so their output has the
//! shape of a single realization's result regardless of how many
//! realizations contributed.
//!
//! Weights are given per realization.  `None` means the realizations were
//! sampled and are implicitly equally likely.

use crate::{algebra::HazardCurves, Error};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A result made of independent per-point values.
pub trait PointValues: Clone {
    fn values(&self) -> &[f64];

    /// Returns a value of the same shape as `self` holding `values`.
    ///
    /// `values.len()` equals `self.values().len()`.
    fn with_values(&self, values: Vec<f64>) -> Self;
}

impl PointValues for Vec<f64> {
    fn values(&self) -> &[f64] {
        self
    }

    fn with_values(&self, values: Vec<f64>) -> Self {
        values
    }
}

impl PointValues for HazardCurves {
    fn values(&self) -> &[f64] {
        self.poes()
    }

    fn with_values(&self, values: Vec<f64>) -> Self {
        self.with_poes(values)
    }
}

/// Statistics of a set of realizations.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate<V> {
    /// Only one realization: there is no distribution, and its result is
    /// passed through untouched.
    Single(V),
    Statistics {
        mean: Option<V>,
        /// One entry per requested quantile, in request order.
        quantiles: Vec<(f64, V)>,
    },
}

/// Computes the mean and/or quantiles of `by_realization` point by point.
///
/// `weights[i]` is the weight of the `i`-th entry of `by_realization` in key
/// order.
pub fn aggregate<V: PointValues>(
    by_realization: &BTreeMap<usize, V>,
    weights: Option<&[f64]>,
    mean: bool,
    quantiles: &[f64],
) -> Result<Aggregate<V>, Error> {
    let results = by_realization.values().collect::<Vec<_>>();
    let template = match results.as_slice() {
        [] => return Err(Error::Aggregation("no realizations".to_string())),
        [single] => return Ok(Aggregate::Single((*single).clone())),
        [first, ..] => *first,
    };
    let values = results.iter().map(|r| r.values()).collect::<Vec<_>>();

    let mean = if mean {
        Some(template.with_values(mean_curve(&values, weights)?))
    } else {
        None
    };
    let quantiles = quantiles
        .iter()
        .map(|q| Ok((*q, template.with_values(quantile_curve(&values, *q, weights)?))))
        .collect::<Result<Vec<_>, Error>>()?;
    debug!(
        "aggregated {} realizations ({}): mean={}, {} quantiles",
        results.len(),
        if weights.is_some() { "weighted" } else { "sampled" },
        mean.is_some(),
        quantiles.len()
    );
    Ok(Aggregate::Statistics { mean, quantiles })
}

/// Weighted mean of `curves` at every point.
pub fn mean_curve(curves: &[&[f64]], weights: Option<&[f64]>) -> Result<Vec<f64>, Error> {
    let n_points = check_curves(curves)?;
    let weights = normalized_weights(curves.len(), weights)?;
    let mut mean = vec![0.0; n_points];
    for (curve, weight) in curves.iter().zip(weights) {
        for (m, v) in mean.iter_mut().zip(curve.iter()) {
            *m += weight * v;
        }
    }
    Ok(mean)
}

/// Quantile `q` of `curves` at every point.
///
/// Without weights, the sample quantile with plotting positions
/// `(k - 0.4) / (n + 0.2)` (Hyndman and Fan's definition 5 family, alpha =
/// beta = 0.4), which is approximately unbiased for normal samples.  With
/// weights, `q` is linearly interpolated over the cumulative normalized
/// weights of the values sorted in increasing order, clamped to the smallest
/// and largest value.
pub fn quantile_curve(curves: &[&[f64]], q: f64, weights: Option<&[f64]>) -> Result<Vec<f64>, Error> {
    if !(0.0..=1.0).contains(&q) {
        return Err(Error::Aggregation(format!("quantile {q} is not in [0, 1]")));
    }
    let n_points = check_curves(curves)?;
    let weights = match weights {
        Some(_) => Some(normalized_weights(curves.len(), weights)?),
        None => None,
    };

    let mut column = Vec::with_capacity(curves.len());
    let mut result = Vec::with_capacity(n_points);
    for point in 0..n_points {
        column.clear();
        column.extend(curves.iter().enumerate().map(|(r, curve)| (curve[point], r)));
        column.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        let value = match &weights {
            None => plotting_position_quantile(&column, q),
            Some(weights) => weighted_quantile(&column, q, weights),
        };
        result.push(value);
    }
    Ok(result)
}

// `sorted` is non-empty and sorted by value.
fn plotting_position_quantile(sorted: &[(f64, usize)], q: f64) -> f64 {
    const ALPHA: f64 = 0.4;
    const BETA: f64 = 0.4;

    let n = sorted.len();
    if n == 1 {
        return sorted[0].0;
    }
    let m = ALPHA + q * (1.0 - ALPHA - BETA);
    let aleph = n as f64 * q + m;
    let k = aleph.clamp(1.0, (n - 1) as f64).floor();
    let gamma = (aleph - k).clamp(0.0, 1.0);
    let k = k as usize;
    (1.0 - gamma) * sorted[k - 1].0 + gamma * sorted[k].0
}

fn weighted_quantile(sorted: &[(f64, usize)], q: f64, weights: &[f64]) -> f64 {
    let mut cumulative = Vec::with_capacity(sorted.len());
    let mut total = 0.0;
    for (_, r) in sorted {
        total += weights[*r];
        cumulative.push(total);
    }
    let values = sorted.iter().map(|(v, _)| *v).collect::<Vec<_>>();
    crate::utils::interp(q, &cumulative, &values)
}

// Returns the number of points per curve.
fn check_curves(curves: &[&[f64]]) -> Result<usize, Error> {
    let Some(first) = curves.first() else {
        return Err(Error::Aggregation("no realizations".to_string()));
    };
    if let Some(other) = curves.iter().find(|c| c.len() != first.len()) {
        return Err(Error::Aggregation(format!(
            "realization results have {} and {} points",
            first.len(),
            other.len()
        )));
    }
    Ok(first.len())
}

fn normalized_weights(n: usize, weights: Option<&[f64]>) -> Result<Vec<f64>, Error> {
    let Some(weights) = weights else {
        return Ok(vec![1.0 / n as f64; n]);
    };
    if weights.len() != n {
        return Err(Error::Aggregation(format!(
            "{} weights for {n} realizations",
            weights.len()
        )));
    }
    if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(Error::Aggregation(format!("invalid realization weight {w}")));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(Error::Aggregation(
            "realization weights sum to zero".to_string(),
        ));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}
