//! Logic trees and the association between realizations and partial results.
//!
//! A source-model branch contains one or more tectonic region models, each
//! tagged with a tectonic region type (TRT).  For every TRT the tree lists
//! alternative ground motion models (GSIMs).  A realization is one choice of
//! source model plus one GSIM per TRT of that source model.
//!
//! Core functions compute curves per `(trt_model_id, gsim)` pair, which is
//! much cheaper than computing them per realization: a pair is shared by
//! every realization that picks that GSIM for that TRT.  The
//! [`RealizationAssociation`] records which realizations each pair
//! contributes to and rebuilds per-realization results from the pairs.

use crate::{algebra::MergeValue, Accumulator, Error};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use tracing::info;

/// Identifier of a tectonic region model, unique across source models.
pub type TrtModelId = u32;

/// Tolerance on the sum of the weights of a branch set.
const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrtModel {
    pub id: TrtModelId,
    /// Tectonic region type, e.g. `Active Shallow Crust`.
    pub trt: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceModelBranch {
    pub id: String,
    pub weight: f64,
    pub trt_models: Vec<TrtModel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GsimBranch {
    pub gsim: String,
    pub weight: f64,
}

/// The weighted alternatives of a calculation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogicTree {
    pub source_models: Vec<SourceModelBranch>,
    /// GSIM branch set of every tectonic region type.
    pub gsims: IndexMap<String, Vec<GsimBranch>>,
}

/// One path through the logic tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Realization {
    pub ordinal: usize,
    pub weight: f64,
    /// Source model id followed by the GSIM chosen for each TRT of the
    /// source model.
    pub sample_path: Vec<String>,
}

/// Key of a partial hazard result.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrtGsim {
    pub trt_model_id: TrtModelId,
    pub gsim: String,
}

impl TrtGsim {
    pub fn new(trt_model_id: TrtModelId, gsim: impl Into<String>) -> Self {
        Self {
            trt_model_id,
            gsim: gsim.into(),
        }
    }
}

impl Display for TrtGsim {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trt_model_id, self.gsim)
    }
}

impl LogicTree {
    pub fn validate(&self) -> Result<(), Error> {
        if self.source_models.is_empty() {
            return Err(Error::LogicTree("no source model branches".to_string()));
        }
        check_weights("source model", self.source_models.iter().map(|b| b.weight))?;
        for (trt, branches) in &self.gsims {
            if branches.is_empty() {
                return Err(Error::LogicTree(format!("no GSIM branches for '{trt}'")));
            }
            check_weights(trt, branches.iter().map(|b| b.weight))?;
        }
        for source_model in &self.source_models {
            if let Some(model) = source_model
                .trt_models
                .iter()
                .find(|model| !self.gsims.contains_key(&model.trt))
            {
                return Err(Error::LogicTree(format!(
                    "source model '{}' uses tectonic region type '{}', which has no GSIM branches",
                    source_model.id, model.trt
                )));
            }
        }
        Ok(())
    }

    /// Enumerates every path through the tree.
    pub fn enumerate(&self) -> Result<RealizationAssociation, Error> {
        self.validate()?;
        let mut builder = AssociationBuilder::default();
        for source_model in &self.source_models {
            let trts = source_model.trts();
            let choices = trts
                .iter()
                .map(|trt| Ok(self.trt_branches(trt)?.2.iter().collect::<Vec<_>>()))
                .collect::<Result<Vec<_>, Error>>()?;
            if choices.is_empty() {
                builder.add(source_model, &trts, &[], source_model.weight);
                continue;
            }
            for path in choices.into_iter().multi_cartesian_product() {
                let weight = path
                    .iter()
                    .fold(source_model.weight, |weight, branch| weight * branch.weight);
                builder.add(source_model, &trts, &path, weight);
            }
        }
        let assoc = builder.build();
        info!(
            "enumerated {} realizations over {} (trt model, gsim) pairs",
            assoc.realizations.len(),
            assoc.rlzs_by_key.len()
        );
        Ok(assoc)
    }

    /// Draws `n` paths at random, each branch chosen with its weight as
    /// probability.  Sampled realizations are equally likely: each has
    /// weight `1 / n`.
    pub fn sample(&self, n: usize, seed: u64) -> Result<RealizationAssociation, Error> {
        self.validate()?;
        if n == 0 {
            return Err(Error::LogicTree("cannot sample zero paths".to_string()));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let source_models = weighted_index(self.source_models.iter().map(|b| b.weight))?;
        let gsims = self
            .gsims
            .values()
            .map(|branches| weighted_index(branches.iter().map(|b| b.weight)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = AssociationBuilder::default();
        for _ in 0..n {
            let source_model = &self.source_models[source_models.sample(&mut rng)];
            let trts = source_model.trts();
            let mut path = Vec::with_capacity(trts.len());
            for trt in &trts {
                let (index, _, branches) = self.trt_branches(trt)?;
                path.push(&branches[gsims[index].sample(&mut rng)]);
            }
            builder.add(source_model, &trts, &path, 1.0 / n as f64);
        }
        let assoc = builder.build();
        info!(
            "sampled {} realizations (seed {seed}) over {} (trt model, gsim) pairs",
            assoc.realizations.len(),
            assoc.rlzs_by_key.len()
        );
        Ok(assoc)
    }

    fn trt_branches(&self, trt: &str) -> Result<(usize, &String, &Vec<GsimBranch>), Error> {
        self.gsims
            .get_full(trt)
            .ok_or_else(|| Error::LogicTree(format!("no GSIM branches for '{trt}'")))
    }
}

impl SourceModelBranch {
    /// Distinct tectonic region types of the branch, in order of first use.
    fn trts(&self) -> Vec<&str> {
        self.trt_models
            .iter()
            .map(|model| model.trt.as_str())
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect()
    }
}

fn check_weights(what: &str, weights: impl Iterator<Item = f64>) -> Result<(), Error> {
    let mut total = 0.0;
    for weight in weights {
        if !(weight.is_finite() && weight > 0.0) {
            return Err(Error::LogicTree(format!(
                "{what} branch weight {weight} is not positive"
            )));
        }
        total += weight;
    }
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(Error::LogicTree(format!(
            "{what} branch weights sum to {total}, not 1"
        )));
    }
    Ok(())
}

fn weighted_index(weights: impl Iterator<Item = f64>) -> Result<WeightedIndex<f64>, Error> {
    WeightedIndex::new(weights).map_err(|error| Error::LogicTree(error.to_string()))
}

#[derive(Default)]
struct AssociationBuilder {
    realizations: Vec<Realization>,
    rlzs_by_key: BTreeMap<TrtGsim, Vec<usize>>,
}

impl AssociationBuilder {
    // `path[i]` is the GSIM chosen for `trts[i]`.
    fn add(
        &mut self,
        source_model: &SourceModelBranch,
        trts: &[&str],
        path: &[&GsimBranch],
        weight: f64,
    ) {
        let ordinal = self.realizations.len();
        for model in &source_model.trt_models {
            if let Some(position) = trts.iter().position(|trt| *trt == model.trt) {
                self.rlzs_by_key
                    .entry(TrtGsim::new(model.id, path[position].gsim.clone()))
                    .or_default()
                    .push(ordinal);
            }
        }
        let mut sample_path = Vec::with_capacity(path.len() + 1);
        sample_path.push(source_model.id.clone());
        sample_path.extend(path.iter().map(|branch| branch.gsim.clone()));
        self.realizations.push(Realization {
            ordinal,
            weight,
            sample_path,
        });
    }

    fn build(self) -> RealizationAssociation {
        RealizationAssociation {
            active: (0..self.realizations.len()).collect(),
            realizations: self.realizations.into(),
            rlzs_by_key: self.rlzs_by_key,
        }
    }
}

/// Which realizations each `(trt_model_id, gsim)` pair contributes to.
///
/// Realizations are created once and shared by every association derived
/// from this one.
#[derive(Clone, Debug, PartialEq)]
pub struct RealizationAssociation {
    realizations: Arc<[Realization]>,
    // Ordinals of the realizations still reachable, in increasing order.
    active: Vec<usize>,
    rlzs_by_key: BTreeMap<TrtGsim, Vec<usize>>,
}

impl RealizationAssociation {
    /// The realizations reachable through this association.
    pub fn realizations(&self) -> impl Iterator<Item = &Realization> {
        self.active.iter().map(|ordinal| &self.realizations[*ordinal])
    }

    pub fn n_realizations(&self) -> usize {
        self.active.len()
    }

    /// Realization weights in ordinal order, or `None` for sampled trees.
    pub fn weights(&self, sampling: bool) -> Option<Vec<f64>> {
        if sampling {
            None
        } else {
            Some(self.realizations().map(|rlz| rlz.weight).collect())
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &TrtGsim> {
        self.rlzs_by_key.keys()
    }

    /// Number of `(trt_model_id, gsim)` pairs.
    pub fn len(&self) -> usize {
        self.rlzs_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rlzs_by_key.is_empty()
    }

    /// Ordinals of the realizations `key` contributes to.
    pub fn realizations_of(&self, key: &TrtGsim) -> &[usize] {
        self.rlzs_by_key.get(key).map_or(&[], Vec::as_slice)
    }

    /// The GSIMs a core function must evaluate for each tectonic region
    /// model.
    pub fn gsims_by_trt_id(&self) -> BTreeMap<TrtModelId, Vec<String>> {
        let mut gsims: BTreeMap<TrtModelId, Vec<String>> = BTreeMap::new();
        for key in self.rlzs_by_key.keys() {
            gsims
                .entry(key.trt_model_id)
                .or_default()
                .push(key.gsim.clone());
        }
        gsims
    }

    /// Builds the result of every realization by merging the values of the
    /// pairs it is made of into `zero`.
    pub fn combine<V: MergeValue>(
        &self,
        results: &Accumulator<TrtGsim, V>,
        zero: &V,
    ) -> Result<BTreeMap<usize, V>, Error> {
        let mut by_rlz = self
            .active
            .iter()
            .map(|ordinal| (*ordinal, zero.clone()))
            .collect::<BTreeMap<_, _>>();
        for (key, ordinals) in &self.rlzs_by_key {
            let Some(value) = results.get(key) else {
                continue;
            };
            for ordinal in ordinals {
                if let Some(acc) = by_rlz.get_mut(ordinal) {
                    acc.merge_into(value)
                        .map_err(|conflict| Error::consistency(key, conflict))?;
                }
            }
        }
        Ok(by_rlz)
    }

    /// Keeps the pairs whose tectonic region model is effective, and the
    /// realizations they reach.
    pub fn reduced(&self, is_effective: impl Fn(TrtModelId) -> bool) -> Self {
        let rlzs_by_key = self
            .rlzs_by_key
            .iter()
            .filter(|(key, _)| is_effective(key.trt_model_id))
            .map(|(key, ordinals)| (key.clone(), ordinals.clone()))
            .collect::<BTreeMap<_, _>>();
        let active = rlzs_by_key
            .values()
            .flatten()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect();
        Self {
            realizations: self.realizations.clone(),
            active,
            rlzs_by_key,
        }
    }
}
