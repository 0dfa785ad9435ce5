//! End-to-end runs of the hazard calculators through the public API.

use indexmap::IndexMap;
use seisma::{
    algebra::{HazardCurves, MergeValue},
    calculators::{Calculator, CurvesByTrtGsim, HazardContext, HazardJob},
    config::{CalculationConfig, CalculationMode, EngineConfig, Imtls},
    logic_tree::{GsimBranch, LogicTree, SourceModelBranch, TrtGsim, TrtModel, TrtModelId},
    output::MemorySink,
    runtime::TaskMonitor,
    site::{Site, SiteCollection},
    stats::Aggregate,
    Accumulator, Block, Engine, Error, WorkItem,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug)]
struct Source {
    lon: f64,
    amplitude: f64,
    broken: bool,
}

type SourceBlock = Block<TrtModelId, WorkItem<TrtModelId, Source>>;

const RADIUS: f64 = 3.0;

// Sources only affect sites within `RADIUS` degrees of longitude, so tiles
// far from all sources of a TRT model get no contribution from it.  Without
// partitioning a block holds the sources of every model.
fn core(block: SourceBlock, context: &HazardContext, _: &TaskMonitor) -> anyhow::Result<CurvesByTrtGsim> {
    let n_sites = context.sites.len();
    let n_levels = context.imtls.n_levels();
    let trt_model_ids = block
        .items
        .iter()
        .map(|item| item.group_key)
        .collect::<BTreeSet<_>>();

    let mut result = Accumulator::new();
    for trt_model_id in trt_model_ids {
        for (index, gsim) in context.gsims(trt_model_id).iter().enumerate() {
            let scale = 1.0 + 0.25 * index as f64;
            let mut acc = context.zero_curves();
            for item in block.items.iter().filter(|item| item.group_key == trt_model_id) {
                let source = &item.payload;
                if source.broken {
                    anyhow::bail!("rupture of source at {} has no magnitude", source.lon);
                }
                let mut poes = Vec::with_capacity(n_sites * n_levels);
                for site in context.sites.iter() {
                    let distance = (site.lon - source.lon).abs();
                    for level in 0..n_levels {
                        let poe = if distance > RADIUS {
                            0.0
                        } else {
                            source.amplitude * scale * (-distance).exp() / (level + 1) as f64
                        };
                        poes.push(poe);
                    }
                }
                acc.merge_into(&HazardCurves::from_poes(n_sites, n_levels, poes)?)?;
            }
            let key = TrtGsim::new(trt_model_id, gsim.clone());
            result = result.merge_owned(Accumulator::singleton(key, acc))?;
        }
    }
    Ok(result)
}

fn sites() -> SiteCollection {
    (0..12)
        .map(|id| Site {
            id,
            lon: f64::from(id),
            lat: 45.0,
            vs30: 760.0,
        })
        .collect()
}

fn logic_tree() -> LogicTree {
    let branch = |gsim: &str, weight: f64| GsimBranch {
        gsim: gsim.to_string(),
        weight,
    };
    LogicTree {
        source_models: vec![
            SourceModelBranch {
                id: "b1".to_string(),
                weight: 0.7,
                trt_models: vec![TrtModel {
                    id: 0,
                    trt: "Active Shallow Crust".to_string(),
                }],
            },
            SourceModelBranch {
                id: "b2".to_string(),
                weight: 0.3,
                trt_models: vec![TrtModel {
                    id: 1,
                    trt: "Stable Continental".to_string(),
                }],
            },
        ],
        gsims: IndexMap::from([
            (
                "Active Shallow Crust".to_string(),
                vec![branch("AbrahamsonSilva2008", 0.6), branch("BooreAtkinson2008", 0.4)],
            ),
            (
                "Stable Continental".to_string(),
                vec![branch("Campbell2003", 1.0)],
            ),
        ]),
    }
}

fn sources() -> Vec<WorkItem<TrtModelId, Source>> {
    let mut sources = Vec::new();
    for i in 0..10 {
        let lon = f64::from(i % 5);
        sources.push(WorkItem::new(
            1.0 + f64::from(i),
            0,
            Source {
                lon,
                amplitude: 0.01 * f64::from(i + 1),
                broken: false,
            },
        ));
    }
    for i in 0..4 {
        sources.push(WorkItem::new(
            2.0,
            1,
            Source {
                lon: 9.0 + f64::from(i % 3),
                amplitude: 0.05,
                broken: false,
            },
        ));
    }
    sources
}

fn config(mode: CalculationMode, engine: EngineConfig) -> CalculationConfig {
    CalculationConfig {
        calculation_mode: mode,
        engine,
        imtls: Imtls::new()
            .with("PGA", vec![0.05, 0.1, 0.2])
            .with("SA(1.0)", vec![0.05, 0.1]),
        individual_curves: true,
        mean_hazard_curves: true,
        quantile_hazard_curves: vec![0.15, 0.85],
        poes: vec![0.01],
        hazard_maps: true,
        uniform_hazard_spectra: true,
        ..CalculationConfig::default()
    }
}

fn run(config: CalculationConfig, sources: Vec<WorkItem<TrtModelId, Source>>) -> Result<(seisma::calculators::HazardOutput, MemorySink), Error> {
    let engine = Engine::new(config)?;
    let mut sink = MemorySink::new();
    let job = HazardJob {
        sources,
        sites: sites(),
        logic_tree: logic_tree(),
        core,
    };
    let output = engine.run_hazard(job, &mut sink)?;
    Ok((output, sink))
}

fn assert_curves_close(a: &HazardCurves, b: &HazardCurves) {
    assert_eq!(a.n_sites(), b.n_sites());
    assert_eq!(a.n_levels(), b.n_levels());
    for (x, y) in a.poes().iter().zip(b.poes()) {
        assert!((x - y).abs() < 1e-12, "{x} != {y}");
    }
}

fn assert_rlzs_close(a: &BTreeMap<usize, HazardCurves>, b: &BTreeMap<usize, HazardCurves>) {
    assert_eq!(a.keys().collect::<Vec<_>>(), b.keys().collect::<Vec<_>>());
    for (x, y) in a.values().zip(b.values()) {
        assert_curves_close(x, y);
    }
}

fn parallel(concurrency_hint: usize) -> EngineConfig {
    EngineConfig {
        workers: 3,
        concurrency_hint,
        ..EngineConfig::default()
    }
}

#[test]
fn serial_and_parallel_agree() {
    let (serial, _) = run(config(CalculationMode::Classical, EngineConfig::default()), sources()).unwrap();
    let (parallel, _) = run(config(CalculationMode::Classical, parallel(8)), sources()).unwrap();

    assert_eq!(serial.realizations.len(), 3);
    assert_rlzs_close(&serial.curves_by_rlz, &parallel.curves_by_rlz);
}

#[test]
fn tiling_matches_classical() {
    let (classical, classical_sink) =
        run(config(CalculationMode::Classical, parallel(4)), sources()).unwrap();
    let (tiled, tiled_sink) = run(
        config(
            CalculationMode::ClassicalTiling,
            EngineConfig {
                max_tile_count: 3,
                tile_concurrency: 2,
                recycle_pool: true,
                ..parallel(4)
            },
        ),
        sources(),
    )
    .unwrap();

    assert!(classical.tiles.is_empty());
    assert_eq!(tiled.tiles.len(), 3);
    assert_rlzs_close(&classical.curves_by_rlz, &tiled.curves_by_rlz);
    assert_eq!(
        classical_sink.names().collect::<Vec<_>>(),
        tiled_sink.names().collect::<Vec<_>>()
    );

    match (&classical.statistics, &tiled.statistics) {
        (
            Aggregate::Statistics {
                mean: Some(a),
                quantiles: qa,
            },
            Aggregate::Statistics {
                mean: Some(b),
                quantiles: qb,
            },
        ) => {
            assert_curves_close(a, b);
            assert_eq!(qa.len(), 2);
            for ((_, x), (_, y)) in qa.iter().zip(qb) {
                assert_curves_close(x, y);
            }
        }
        other => panic!("unexpected statistics {other:?}"),
    }
}

#[test]
fn tiles_report_effective_models() {
    let (tiled, _) = run(
        config(
            CalculationMode::ClassicalTiling,
            EngineConfig {
                max_tile_count: 3,
                ..parallel(3)
            },
        ),
        sources(),
    )
    .unwrap();

    // Sites 0..4 only see the active crust sources, sites 8..12 only the
    // stable continental ones.
    let models = |ordinal: usize| {
        let mut ids = tiled.tiles[ordinal]
            .effective_keys
            .iter()
            .map(|key| key.trt_model_id)
            .collect::<Vec<_>>();
        ids.dedup();
        ids
    };
    assert_eq!(models(0), vec![0]);
    assert_eq!(models(1), vec![0, 1]);
    assert_eq!(models(2), vec![1]);

    let rlzs = |ordinal: usize| {
        tiled.tile_associations[ordinal]
            .realizations()
            .map(|rlz| rlz.ordinal)
            .collect::<Vec<_>>()
    };
    assert_eq!(tiled.tile_associations.len(), 3);
    assert_eq!(rlzs(0), vec![0, 1]);
    assert_eq!(rlzs(1), vec![0, 1, 2]);
    assert_eq!(rlzs(2), vec![2]);
}

#[test]
fn source_order_does_not_matter() {
    let (forward, _) = run(config(CalculationMode::Classical, parallel(5)), sources()).unwrap();
    let mut reversed_sources = sources();
    reversed_sources.reverse();
    let (reversed, _) = run(config(CalculationMode::Classical, parallel(5)), reversed_sources).unwrap();
    assert_rlzs_close(&forward.curves_by_rlz, &reversed.curves_by_rlz);
}

#[test]
fn failing_source_aborts_the_calculation() {
    let mut sources = sources();
    sources[3].payload.broken = true;

    let tiled = |tile_concurrency: usize| EngineConfig {
        max_tile_count: 3,
        tile_concurrency,
        ..parallel(4)
    };
    for (mode, engine) in [
        (CalculationMode::Classical, EngineConfig::default()),
        (CalculationMode::Classical, parallel(4)),
        (CalculationMode::ClassicalTiling, tiled(1)),
        (CalculationMode::ClassicalTiling, tiled(2)),
    ] {
        let err = match run(config(mode, engine), sources.clone()) {
            Err(err) => err,
            Ok(_) => panic!("a broken source must fail the calculation"),
        };
        match err {
            Error::Worker { source, .. } => {
                assert!(source.to_string().contains("no magnitude"));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}

#[test]
fn sampled_statistics_are_unweighted() {
    let mut config = config(CalculationMode::Classical, parallel(4));
    config.number_of_logic_tree_samples = 6;
    config.random_seed = 7;
    let (output, sink) = run(config, sources()).unwrap();

    assert_eq!(output.realizations.len(), 6);
    assert!(sink.get("hcurves/rlz-0005").is_some());
    assert!(sink.get("uhs/mean").is_some());
}

#[test]
fn hazard_job_needs_hazard_calculator() {
    let config = CalculationConfig {
        calculation_mode: CalculationMode::ScenarioRisk,
        ..CalculationConfig::default()
    };
    let engine = Engine::new(config).unwrap();
    assert_eq!(engine.calculator(), Calculator::ScenarioRisk);
    let job = HazardJob {
        sources: sources(),
        sites: sites(),
        logic_tree: logic_tree(),
        core,
    };
    let err = engine.run_hazard(job, &mut MemorySink::new()).unwrap_err();
    assert!(matches!(err, Error::ModeMismatch { job: "hazard", .. }));
}
