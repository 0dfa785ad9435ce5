//! Classical PSHA over site tiles.
//!
//! Every tile runs the classical pipeline on all sources for a subset of the
//! sites, and the tile curves are written into the full output by position.

use super::{classical::post_execute, realizations, HazardContext, HazardCore, HazardJob, HazardOutput};
use crate::{
    output::DatasetSink,
    runtime::{Dispatcher, Monitor},
    tiling::TileCoordinator,
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
    S: Clone + Send + Sync + 'static,
    F: HazardCore<S>,
{
    let engine = Arc::new(config.engine.clone());
    let mut monitor = Monitor::new(CalculationMode::ClassicalTiling.as_str(), engine.clone());

    let assoc = realizations(config, &job.logic_tree)?;
    let context = HazardContext::new(job.sites, config.imtls.clone(), &assoc);
    let zero = context.zero_curves();
    let full = Accumulator::with_zeros(assoc.keys().cloned(), &zero);

    let mut dispatcher = Dispatcher::new(engine)?;
    let tiled = TileCoordinator::new(&mut dispatcher).run(
        &job.sources,
        |source| source.weight,
        |source| source.group_key,
        &context,
        job.core,
        full,
        &mut monitor,
    )?;

    let tile_associations = tiled
        .tiles
        .iter()
        .map(|report| {
            let reduced = assoc.reduced(|trt_model_id| {
                report
                    .effective_keys
                    .iter()
                    .any(|key| key.trt_model_id == trt_model_id)
            });
            info!(
                "tile {}: (sites, levels, keys, rlzs) = ({}, {}, {}, {})",
                report.tile.ordinal,
                report.tile.size,
                context.imtls.n_levels(),
                reduced.len(),
                reduced.n_realizations()
            );
            reduced
        })
        .collect();

    let mut output = post_execute(config, &assoc, tiled.output, &zero, sink, &mut monitor)?;
    output.tiles = tiled.tiles;
    output.tile_associations = tile_associations;
    monitor.log_summary();
    Ok(output)
}
