//! The calculation modes.
//!
//! Each [`CalculationMode`] maps to one [`Calculator`] variant, resolved
//! once when the engine is built.  Hazard calculators consume a
//! [`HazardJob`]; the risk calculator consumes a [`RiskJob`].

mod classical;
mod scenario_risk;
mod tiling;

use crate::{
    algebra::{HazardCurves, LossKey, LossTable},
    logic_tree::{LogicTree, Realization, RealizationAssociation, TrtGsim, TrtModelId},
    output::DatasetSink,
    partition::{Block, WorkItem},
    runtime::TaskMonitor,
    site::SiteCollection,
    stats::Aggregate,
    tiling::{Tile, TileReport, TileScoped},
    Accumulator, Error,
};
use seisma_types::config::{CalculationConfig, CalculationMode, Imtls};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Partial hazard curves, keyed by tectonic region model and GSIM.
pub type CurvesByTrtGsim = Accumulator<TrtGsim, HazardCurves>;

/// Partial losses, keyed by realization ordinal and loss key.
pub type LossesByKey = Accumulator<(usize, LossKey), LossTable>;

/// A function computing the hazard curves of a block of sources.
///
/// The sources of a block share a tectonic region model id, and the
/// function returns curves for every GSIM the context associates with it.
pub trait HazardCore<S>:
    Fn(Block<TrtModelId, WorkItem<TrtModelId, S>>, &HazardContext, &TaskMonitor) -> anyhow::Result<CurvesByTrtGsim>
    + Send
    + Sync
    + 'static
{
}

impl<S, F> HazardCore<S> for F where
    F: Fn(Block<TrtModelId, WorkItem<TrtModelId, S>>, &HazardContext, &TaskMonitor) -> anyhow::Result<CurvesByTrtGsim>
        + Send
        + Sync
        + 'static
{
}

/// A function computing the losses of a block of risk inputs.
pub trait RiskCore<K, P, C>:
    Fn(Block<K, WorkItem<K, P>>, &C, &TaskMonitor) -> anyhow::Result<LossesByKey> + Send + Sync + 'static
{
}

impl<K, P, C, F> RiskCore<K, P, C> for F where
    F: Fn(Block<K, WorkItem<K, P>>, &C, &TaskMonitor) -> anyhow::Result<LossesByKey>
        + Send
        + Sync
        + 'static
{
}

/// Read-only data shared by every invocation of a [`HazardCore`].
#[derive(Clone, Debug)]
pub struct HazardContext {
    pub sites: SiteCollection,
    pub imtls: Arc<Imtls>,
    pub gsims_by_trt: Arc<BTreeMap<TrtModelId, Vec<String>>>,
}

impl HazardContext {
    pub fn new(sites: SiteCollection, imtls: Imtls, assoc: &RealizationAssociation) -> Self {
        Self {
            sites,
            imtls: Arc::new(imtls),
            gsims_by_trt: Arc::new(assoc.gsims_by_trt_id()),
        }
    }

    /// GSIMs to evaluate for the sources of `trt_model_id`.
    pub fn gsims(&self, trt_model_id: TrtModelId) -> &[String] {
        self.gsims_by_trt
            .get(&trt_model_id)
            .map_or(&[], Vec::as_slice)
    }

    /// All-zero curves for the sites of this context.
    pub fn zero_curves(&self) -> HazardCurves {
        HazardCurves::zeros(self.sites.len(), self.imtls.n_levels())
    }
}

impl TileScoped for HazardContext {
    fn n_points(&self) -> usize {
        self.sites.len()
    }

    fn restrict(&self, tile: &Tile) -> Self {
        Self {
            sites: self.sites.restrict(tile),
            imtls: self.imtls.clone(),
            gsims_by_trt: self.gsims_by_trt.clone(),
        }
    }
}

/// Inputs of a hazard calculation.
pub struct HazardJob<S, F> {
    /// Sources weighted by expected cost and grouped by tectonic region
    /// model.
    pub sources: Vec<WorkItem<TrtModelId, S>>,
    pub sites: SiteCollection,
    pub logic_tree: LogicTree,
    pub core: F,
}

#[derive(Clone, Debug)]
pub struct HazardOutput {
    pub realizations: Vec<Realization>,
    pub curves_by_trt_gsim: CurvesByTrtGsim,
    pub curves_by_rlz: BTreeMap<usize, HazardCurves>,
    pub statistics: Aggregate<HazardCurves>,
    /// One report per tile; empty unless the calculation was tiled.
    pub tiles: Vec<TileReport<TrtGsim>>,
    /// The association reduced to the models effective in each tile, in
    /// the order of `tiles`.  Realization ordinals are those of the full
    /// association.
    pub tile_associations: Vec<RealizationAssociation>,
}

/// Inputs of a risk calculation.
pub struct RiskJob<K, P, C, F> {
    /// Risk inputs weighted by expected cost and grouped by `K`.
    pub inputs: Vec<WorkItem<K, P>>,
    pub context: C,
    pub core: F,
}

#[derive(Clone, Debug)]
pub struct RiskOutput {
    pub losses_by_key: LossesByKey,
}

/// The pipeline of a calculation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Calculator {
    Classical,
    ClassicalTiling,
    ScenarioRisk,
}

impl Calculator {
    pub fn for_mode(mode: CalculationMode) -> Self {
        match mode {
            CalculationMode::Classical => Self::Classical,
            CalculationMode::ClassicalTiling => Self::ClassicalTiling,
            CalculationMode::ScenarioRisk => Self::ScenarioRisk,
        }
    }

    pub fn mode(&self) -> CalculationMode {
        match self {
            Self::Classical => CalculationMode::Classical,
            Self::ClassicalTiling => CalculationMode::ClassicalTiling,
            Self::ScenarioRisk => CalculationMode::ScenarioRisk,
        }
    }

    pub fn run_hazard<S, F>(
        &self,
        config: &CalculationConfig,
        job: HazardJob<S, F>,
        sink: &mut dyn DatasetSink,
    ) -> Result<HazardOutput, Error>
    where
        S: Clone + Send + Sync + 'static,
        F: HazardCore<S>,
    {
        match self {
            Self::Classical => classical::run(config, job, sink),
            Self::ClassicalTiling => tiling::run(config, job, sink),
            Self::ScenarioRisk => Err(Error::ModeMismatch {
                calculator: self.mode(),
                job: "hazard",
            }),
        }
    }

    pub fn run_risk<K, P, C, F>(
        &self,
        config: &CalculationConfig,
        job: RiskJob<K, P, C, F>,
        sink: &mut dyn DatasetSink,
    ) -> Result<RiskOutput, Error>
    where
        K: Ord + Clone + Debug + Send + 'static,
        P: Send + 'static,
        C: Send + Sync + 'static,
        F: RiskCore<K, P, C>,
    {
        match self {
            Self::ScenarioRisk => scenario_risk::run(config, job, sink),
            Self::Classical | Self::ClassicalTiling => Err(Error::ModeMismatch {
                calculator: self.mode(),
                job: "risk",
            }),
        }
    }
}

/// Enumerates or samples the realizations of `logic_tree`, as configured.
fn realizations(
    config: &CalculationConfig,
    logic_tree: &LogicTree,
) -> Result<RealizationAssociation, Error> {
    if config.is_sampling() {
        logic_tree.sample(config.number_of_logic_tree_samples, config.random_seed)
    } else {
        logic_tree.enumerate()
    }
}
