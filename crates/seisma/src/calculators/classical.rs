//! Classical PSHA: sources are partitioned across workers and the partial
//! curves are reduced by value.

use super::{realizations, CurvesByTrtGsim, HazardContext, HazardCore, HazardJob, HazardOutput};
use crate::{
    algebra::HazardCurves,
    hazard_maps::{compute_hazard_maps, uniform_hazard_spectra},
    logic_tree::RealizationAssociation,
    output::{self, quantile_name, realization_name, Dataset, DatasetSink},
    partition::partition,
    runtime::{Dispatcher, Monitor, Phase},
    stats::{aggregate, Aggregate},
    Accumulator, Error,
};
use seisma_types::config::{CalculationConfig, CalculationMode};
use std::sync::Arc;
use tracing::info;

pub(super) fn run<S, F>(
    config: &CalculationConfig,
    job: HazardJob<S, F>,
    sink: &mut dyn DatasetSink,
) -> Result<HazardOutput, Error>
where
    S: Send + 'static,
    F: HazardCore<S>,
{
    let engine = Arc::new(config.engine.clone());
    let mut monitor = Monitor::new(CalculationMode::Classical.as_str(), engine.clone());

    let assoc = realizations(config, &job.logic_tree)?;
    let context = HazardContext::new(job.sites, config.imtls.clone(), &assoc);
    let zero = context.zero_curves();
    let initial = Accumulator::with_zeros(assoc.keys().cloned(), &zero);

    let n_sources = job.sources.len();
    let blocks = monitor.measure(Phase::Partition, || {
        partition(job.sources, engine.concurrency_hint)
    })?;
    info!(
        "classical: {} sources in {} blocks, {} sites, {} realizations",
        n_sources,
        blocks.len(),
        context.sites.len(),
        assoc.n_realizations()
    );

    let dispatcher = Dispatcher::new(engine)?;
    let curves = dispatcher.apply_reduce(
        job.core,
        blocks,
        Arc::new(context),
        initial,
        |acc, partial| acc.merge_owned(partial),
        &mut monitor,
    )?;

    let output = post_execute(config, &assoc, curves, &zero, sink, &mut monitor)?;
    monitor.log_summary();
    Ok(output)
}

/// Combines the reduced curves into realizations, computes their
/// statistics, and stores everything requested by `config`.
pub(super) fn post_execute(
    config: &CalculationConfig,
    assoc: &RealizationAssociation,
    curves: CurvesByTrtGsim,
    zero: &HazardCurves,
    sink: &mut dyn DatasetSink,
    monitor: &mut Monitor,
) -> Result<HazardOutput, Error> {
    let curves_by_rlz = monitor.measure(Phase::Aggregate, || assoc.combine(&curves, zero))?;

    monitor.measure(Phase::Store, || {
        store(
            sink,
            "curves_by_trt_gsim",
            output::curves_by_trt_gsim(curves.iter().map(|(key, value)| (key.clone(), value.clone()))),
        )?;
        if config.individual_curves {
            for (ordinal, rlz_curves) in &curves_by_rlz {
                store_curves(config, &realization_name(*ordinal), rlz_curves, sink)?;
            }
        }
        Ok::<_, Error>(())
    })?;

    let weights = assoc.weights(config.is_sampling());
    let statistics = monitor.measure(Phase::Aggregate, || {
        aggregate(
            &curves_by_rlz,
            weights.as_deref(),
            config.mean_hazard_curves,
            &config.quantile_hazard_curves,
        )
    })?;

    monitor.measure(Phase::Store, || {
        // A single realization has no statistics; its curves are stored only
        // as individual curves.
        match &statistics {
            Aggregate::Single(_) => {}
            Aggregate::Statistics { mean, quantiles } => {
                if let Some(mean) = mean {
                    store_curves(config, "mean", mean, sink)?;
                }
                for (q, quantile) in quantiles {
                    store_curves(config, &quantile_name(*q), quantile, sink)?;
                }
            }
        }
        Ok::<_, Error>(())
    })?;

    Ok(HazardOutput {
        realizations: assoc.realizations().cloned().collect(),
        curves_by_trt_gsim: curves,
        curves_by_rlz,
        statistics,
        tiles: Vec::new(),
        tile_associations: Vec::new(),
    })
}

/// Stores `curves` and, when requested, their hazard maps and uniform
/// hazard spectra.
fn store_curves(
    config: &CalculationConfig,
    name: &str,
    curves: &HazardCurves,
    sink: &mut dyn DatasetSink,
) -> Result<(), Error> {
    store(sink, &format!("hcurves/{name}"), Dataset::Curves(curves.clone()))?;
    if !(config.hazard_maps || config.uniform_hazard_spectra) {
        return Ok(());
    }
    let maps = compute_hazard_maps(curves, &config.imtls, &config.poes)?;
    if config.uniform_hazard_spectra {
        let spectra = uniform_hazard_spectra(&maps)?;
        store(sink, &format!("uhs/{name}"), Dataset::Spectra(spectra))?;
    }
    if config.hazard_maps {
        store(sink, &format!("hmaps/{name}"), Dataset::HazardMaps(maps))?;
    }
    Ok(())
}

pub(super) fn store(sink: &mut dyn DatasetSink, name: &str, dataset: Dataset) -> Result<(), Error> {
    sink.store(name, dataset).map_err(|source| Error::Sink {
        dataset: name.to_string(),
        source,
    })
}
