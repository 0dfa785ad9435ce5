//! Computes classical hazard curves for a line of sites and a toy source
//! model with an attenuation law of the form `poe = a * exp(-r / r0) / iml`.
//!
//! ```text
//! RUST_LOG=info cargo run --example classical -- [concurrency_hint]
//! ```

use anyhow::Result;
use indexmap::IndexMap;
use seisma::{
    algebra::{HazardCurves, MergeValue},
    calculators::{CurvesByTrtGsim, HazardContext, HazardJob},
    config::{CalculationConfig, CalculationMode, EngineConfig, Imtls},
    logic_tree::{GsimBranch, LogicTree, SourceModelBranch, TrtGsim, TrtModel, TrtModelId},
    output::{Dataset, MemorySink},
    runtime::TaskMonitor,
    site::{Site, SiteCollection},
    Accumulator, Block, Engine, WorkItem,
};
use std::collections::BTreeSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Clone, Debug)]
struct PointSource {
    lon: f64,
    lat: f64,
    activity: f64,
}

// Decay distance of each GSIM, in degrees.
fn decay(gsim: &str) -> f64 {
    match gsim {
        "Fast" => 0.5,
        _ => 1.5,
    }
}

fn core(
    block: Block<TrtModelId, WorkItem<TrtModelId, PointSource>>,
    context: &HazardContext,
    task: &TaskMonitor,
) -> Result<CurvesByTrtGsim> {
    let n_sites = context.sites.len();
    let imls = context
        .imtls
        .iter()
        .flat_map(|(_, levels, _)| levels.iter().copied())
        .collect::<Vec<_>>();
    let trt_model_ids = block
        .items
        .iter()
        .map(|item| item.group_key)
        .collect::<BTreeSet<_>>();

    let mut result = Accumulator::new();
    for trt_model_id in trt_model_ids {
        for gsim in context.gsims(trt_model_id) {
            let mut curves = context.zero_curves();
            for item in block.items.iter().filter(|item| item.group_key == trt_model_id) {
                let source = &item.payload;
                let poes = context
                    .sites
                    .iter()
                    .flat_map(|site| {
                        let r = (site.lon - source.lon).hypot(site.lat - source.lat);
                        imls.iter().map(move |iml| {
                            (source.activity * (-r / decay(gsim)).exp() * 0.01 / iml).min(1.0)
                        })
                    })
                    .collect();
                curves.merge_into(&HazardCurves::from_poes(n_sites, imls.len(), poes)?)?;
            }
            result = result.merge_owned(Accumulator::singleton(TrtGsim::new(trt_model_id, gsim.clone()), curves))?;
        }
    }
    tracing::debug!(
        "block {} on worker {:?}: {} sources",
        task.block(),
        task.worker(),
        block.len()
    );
    Ok(result)
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?)
        .try_init();

    let concurrency_hint = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(8);

    let config = CalculationConfig {
        calculation_mode: CalculationMode::Classical,
        engine: EngineConfig {
            concurrency_hint,
            ..EngineConfig::default()
        },
        imtls: Imtls::new()
            .with("PGA", vec![0.005, 0.01, 0.05, 0.1, 0.2])
            .with("SA(0.5)", vec![0.005, 0.01, 0.05, 0.1, 0.2]),
        quantile_hazard_curves: vec![0.15, 0.5, 0.85],
        poes: vec![0.1, 0.02],
        hazard_maps: true,
        uniform_hazard_spectra: true,
        ..CalculationConfig::default()
    };
    let engine = Engine::new(config)?;

    let sites = (0..50)
        .map(|id| Site {
            id,
            lon: f64::from(id) * 0.1,
            lat: 0.0,
            vs30: 760.0,
        })
        .collect::<SiteCollection>();
    let sources = (0..200)
        .map(|i| {
            let source = PointSource {
                lon: f64::from(i % 50) * 0.1,
                lat: 0.2 * f64::from(i % 3),
                activity: 0.001 * f64::from(1 + i % 7),
            };
            WorkItem::new(source.activity, (i % 2) as TrtModelId, source)
        })
        .collect();
    let logic_tree = LogicTree {
        source_models: vec![SourceModelBranch {
            id: "b1".to_string(),
            weight: 1.0,
            trt_models: vec![
                TrtModel {
                    id: 0,
                    trt: "Active Shallow Crust".to_string(),
                },
                TrtModel {
                    id: 1,
                    trt: "Subduction Interface".to_string(),
                },
            ],
        }],
        gsims: IndexMap::from([
            (
                "Active Shallow Crust".to_string(),
                vec![
                    GsimBranch {
                        gsim: "Fast".to_string(),
                        weight: 0.5,
                    },
                    GsimBranch {
                        gsim: "Slow".to_string(),
                        weight: 0.5,
                    },
                ],
            ),
            (
                "Subduction Interface".to_string(),
                vec![GsimBranch {
                    gsim: "Slow".to_string(),
                    weight: 1.0,
                }],
            ),
        ]),
    };

    let mut sink = MemorySink::new();
    let output = engine.run_hazard(
        HazardJob {
            sources,
            sites,
            logic_tree,
            core,
        },
        &mut sink,
    )?;

    println!("{} realizations", output.realizations.len());
    for name in sink.names() {
        println!("  {name}");
    }
    if let Some(Dataset::Spectra(uhs)) = sink.get("uhs/mean") {
        println!("mean UHS at site 0, poe 0.1: {:?}", uhs.spectrum(0, 0));
    }
    Ok(())
}
