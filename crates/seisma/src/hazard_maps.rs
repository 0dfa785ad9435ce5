//! Hazard maps and uniform hazard spectra.
//!
//! A hazard map gives, for every site, the intensity level whose probability
//! of exceedance equals a target `poe`.  A uniform hazard spectrum collects
//! the spectral accelerations of a hazard map at increasing periods.

use crate::{algebra::HazardCurves, utils::interp, Error};
use indexmap::IndexMap;
use seisma_types::config::Imtls;
use serde::Serialize;

/// Probabilities below this value are raised to it before taking
/// logarithms.
pub const EPSILON: f64 = 1e-30;

/// Intensity levels per IMT, site, and target probability of exceedance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HazardMaps {
    n_sites: usize,
    poes: Vec<f64>,
    /// For every IMT, `n_sites * poes.len()` levels, row-major by site.
    levels: IndexMap<String, Vec<f64>>,
}

impl HazardMaps {
    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn poes(&self) -> &[f64] {
        &self.poes
    }

    pub fn imts(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    /// Levels of `imt` at `site`, one per target poe.
    pub fn site(&self, imt: &str, site: usize) -> Option<&[f64]> {
        let n_poes = self.poes.len();
        self.levels
            .get(imt)
            .and_then(|levels| levels.get(site * n_poes..(site + 1) * n_poes))
    }
}

/// Computes the hazard maps of `curves` for every IMT in `imtls`.
///
/// Curves are interpolated linearly in log-log space.  A target poe above
/// the highest probability of a curve yields level 0.
pub fn compute_hazard_maps(
    curves: &HazardCurves,
    imtls: &Imtls,
    poes: &[f64],
) -> Result<HazardMaps, Error> {
    if curves.n_levels() != imtls.n_levels() {
        return Err(Error::Aggregation(format!(
            "curves have {} levels but the intensity measure types define {}",
            curves.n_levels(),
            imtls.n_levels()
        )));
    }
    let mut levels = IndexMap::with_capacity(imtls.len());
    for (imt, imls, range) in imtls.iter() {
        // `interp` needs increasing abscissas: walk the curve from the
        // highest level down.
        let log_imls = imls.iter().rev().map(|iml| iml.ln()).collect::<Vec<_>>();
        let mut values = Vec::with_capacity(curves.n_sites() * poes.len());
        for site in 0..curves.n_sites() {
            let log_curve = curves.site(site)[range.clone()]
                .iter()
                .rev()
                .map(|poe| poe.max(EPSILON).ln())
                .collect::<Vec<_>>();
            let highest = log_curve.last().copied().unwrap_or(f64::NEG_INFINITY);
            for poe in poes {
                let log_poe = poe.ln();
                if log_poe > highest {
                    values.push(0.0);
                } else {
                    values.push(interp(log_poe, &log_curve, &log_imls).exp());
                }
            }
        }
        levels.insert(imt.to_string(), values);
    }
    Ok(HazardMaps {
        n_sites: curves.n_sites(),
        poes: poes.to_vec(),
        levels,
    })
}

/// Spectral acceleration levels per site, target poe, and period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UniformHazardSpectra {
    n_sites: usize,
    n_poes: usize,
    /// Increasing; `PGA` has period 0.
    periods: Vec<f64>,
    /// Shape `(n_sites, n_poes, periods.len())`, row-major.
    values: Vec<f64>,
}

impl UniformHazardSpectra {
    pub fn periods(&self) -> &[f64] {
        &self.periods
    }

    /// Spectrum of `site` for the `poe`-th target poe.
    pub fn spectrum(&self, site: usize, poe: usize) -> &[f64] {
        let n_periods = self.periods.len();
        let start = (site * self.n_poes + poe) * n_periods;
        &self.values[start..start + n_periods]
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }
}

/// Returns the period of `PGA` (0) and `SA(T)` (T).  Other IMTs have none.
pub fn imt_period(imt: &str) -> Option<f64> {
    if imt == "PGA" {
        return Some(0.0);
    }
    imt.strip_prefix("SA(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|period| period.trim().parse().ok())
}

/// Builds the uniform hazard spectra of `maps` from its `PGA` and `SA(T)`
/// levels, ordered by period.
pub fn uniform_hazard_spectra(maps: &HazardMaps) -> Result<UniformHazardSpectra, Error> {
    let mut columns = maps
        .levels
        .iter()
        .filter_map(|(imt, levels)| imt_period(imt).map(|period| (period, levels)))
        .collect::<Vec<_>>();
    if columns.is_empty() {
        return Err(Error::Aggregation(
            "uniform hazard spectra need PGA or SA intensity measure types".to_string(),
        ));
    }
    columns.sort_by(|(a, _), (b, _)| a.total_cmp(b));

    let n_poes = maps.poes.len();
    let mut values = Vec::with_capacity(maps.n_sites * n_poes * columns.len());
    for site in 0..maps.n_sites {
        for poe in 0..n_poes {
            values.extend(columns.iter().map(|(_, levels)| levels[site * n_poes + poe]));
        }
    }
    Ok(UniformHazardSpectra {
        n_sites: maps.n_sites,
        n_poes,
        periods: columns.iter().map(|(period, _)| *period).collect(),
        values,
    })
}
