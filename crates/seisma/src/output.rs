//! Handing results to the persistence layer.
//!
//! The engine does not know how results are stored.  It produces named
//! [`Dataset`]s and passes them to a [`DatasetSink`].  Names are
//! slash-separated paths:
//!
//! - `hcurves/rlz-0003`, `hcurves/mean`, `hcurves/quantile-0.15`: hazard
//!   curves of shape `(n_sites, n_levels)`;
//! - `hmaps/...` and `uhs/...`: the hazard maps and uniform hazard spectra of
//!   the curves with the same suffix;
//! - `curves_by_trt_gsim`: the reduced partial curves, before they are
//!   combined into realizations;
//! - `losses/rlz-0000/agg/structural`: scenario loss tables.

use crate::{
    algebra::{HazardCurves, LossKey, LossTable},
    hazard_maps::{HazardMaps, UniformHazardSpectra},
    logic_tree::TrtGsim,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Dataset {
    Curves(HazardCurves),
    CurvesByTrtGsim(BTreeMap<String, HazardCurves>),
    HazardMaps(HazardMaps),
    Spectra(UniformHazardSpectra),
    Losses(LossTable),
}

impl Dataset {
    pub fn as_curves(&self) -> Option<&HazardCurves> {
        match self {
            Self::Curves(curves) => Some(curves),
            _ => None,
        }
    }

    pub fn as_losses(&self) -> Option<&LossTable> {
        match self {
            Self::Losses(losses) => Some(losses),
            _ => None,
        }
    }
}

/// Receives the datasets of a calculation.
pub trait DatasetSink {
    /// Stores `dataset` under `name`, replacing any previous dataset with
    /// that name.
    fn store(&mut self, name: &str, dataset: Dataset) -> anyhow::Result<()>;
}

/// A sink that keeps datasets in memory, for tests and embedding.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct MemorySink {
    datasets: BTreeMap<String, Dataset>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Dataset> {
        self.datasets
    }
}

impl DatasetSink for MemorySink {
    fn store(&mut self, name: &str, dataset: Dataset) -> anyhow::Result<()> {
        debug!("storing dataset {name}");
        self.datasets.insert(name.to_string(), dataset);
        Ok(())
    }
}

/// Name suffix of the individual results of realization `ordinal`.
pub fn realization_name(ordinal: usize) -> String {
    format!("rlz-{ordinal:04}")
}

/// Name suffix of the quantile `q` statistic.
pub fn quantile_name(q: f64) -> String {
    format!("quantile-{q}")
}

pub fn loss_dataset_name(ordinal: usize, key: &LossKey) -> String {
    format!("losses/{}/{key}", realization_name(ordinal))
}

pub(crate) fn curves_by_trt_gsim(
    curves: impl IntoIterator<Item = (TrtGsim, HazardCurves)>,
) -> Dataset {
    Dataset::CurvesByTrtGsim(
        curves
            .into_iter()
            .map(|(key, curves)| (key.to_string(), curves))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::{loss_dataset_name, quantile_name, realization_name, Dataset, DatasetSink, MemorySink};
    use crate::algebra::{HazardCurves, LossKey, LossKind};

    #[test]
    fn names() {
        assert_eq!(realization_name(3), "rlz-0003");
        assert_eq!(quantile_name(0.15), "quantile-0.15");
        assert_eq!(
            loss_dataset_name(1, &LossKey::new(LossKind::AssetInsured, "structural")),
            "losses/rlz-0001/asset-ins/structural"
        );
    }

    #[test]
    fn memory_sink_replaces() {
        let mut sink = MemorySink::new();
        sink.store("hcurves/mean", Dataset::Curves(HazardCurves::zeros(1, 2)))
            .unwrap();
        sink.store("hcurves/mean", Dataset::Curves(HazardCurves::zeros(2, 2)))
            .unwrap();
        assert_eq!(sink.len(), 1);
        let curves = sink.get("hcurves/mean").and_then(Dataset::as_curves).unwrap();
        assert_eq!(curves.n_sites(), 2);

        let json = serde_json::to_value(&sink).unwrap();
        assert_eq!(json["hcurves/mean"]["type"], "curves");
        assert_eq!(json["hcurves/mean"]["data"]["n_sites"], 2);
    }
}
