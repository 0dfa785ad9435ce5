//! Scenario risk: risk inputs are partitioned across workers and the loss
//! tables they produce are collected per realization and loss type.

use super::{classical::store, RiskCore, RiskJob, RiskOutput};
use crate::{
    output::{loss_dataset_name, Dataset, DatasetSink},
    partition::partition,
    runtime::{Dispatcher, Monitor, Phase},
    Accumulator, Error,
};
use seisma_types::config::{CalculationConfig, CalculationMode};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

pub(super) fn run<K, P, C, F>(
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
    let engine = Arc::new(config.engine.clone());
    let mut monitor = Monitor::new(CalculationMode::ScenarioRisk.as_str(), engine.clone());

    let n_inputs = job.inputs.len();
    let blocks = monitor.measure(Phase::Partition, || {
        partition(job.inputs, engine.concurrency_hint)
    })?;
    info!(
        "scenario_risk: {} risk inputs in {} blocks",
        n_inputs,
        blocks.len()
    );

    // Loss tables have no fixed shape, so the reduction starts empty and
    // every key is created by the first block that reports it.
    let dispatcher = Dispatcher::new(engine)?;
    let losses_by_key = dispatcher.apply_reduce(
        job.core,
        blocks,
        Arc::new(job.context),
        Accumulator::new(),
        |acc, partial| acc.merge_owned(partial),
        &mut monitor,
    )?;

    monitor.measure(Phase::Store, || {
        for ((ordinal, key), losses) in losses_by_key.iter() {
            store(
                sink,
                &loss_dataset_name(*ordinal, key),
                Dataset::Losses(losses.clone()),
            )?;
        }
        Ok::<_, Error>(())
    })?;
    info!(
        "scenario_risk: stored {} loss tables",
        losses_by_key.len()
    );

    monitor.log_summary();
    Ok(RiskOutput { losses_by_key })
}

#[cfg(test)]
mod tests {
    use super::super::{Calculator, LossesByKey, RiskJob};
    use crate::{
        algebra::{AssetLoss, LossKey, LossKind, LossTable},
        output::{Dataset, MemorySink},
        partition::{Block, WorkItem},
        runtime::TaskMonitor,
        test::init_test_logger,
        Accumulator, Error,
    };
    use pretty_assertions::assert_eq;
    use seisma_types::config::{CalculationConfig, CalculationMode, EngineConfig};

    // An asset's loss is its value times the scenario's damage ratio.
    struct Scenario {
        damage_ratios: Vec<f64>,
    }

    fn core(
        block: Block<String, WorkItem<String, (String, f64)>>,
        scenario: &Scenario,
        _: &TaskMonitor,
    ) -> anyhow::Result<LossesByKey> {
        let mut result = Accumulator::new();
        for item in block.items {
            let (asset, value) = item.payload;
            let key = LossKey::new(LossKind::AssetLoss, item.group_key);
            for (ordinal, ratio) in scenario.damage_ratios.iter().enumerate() {
                let loss = AssetLoss {
                    mean: value * ratio,
                    stddev: 0.0,
                };
                let table = LossTable::from_assets([(asset.clone(), loss)]);
                result = result.merge_owned(Accumulator::singleton((ordinal, key.clone()), table))?;
            }
        }
        Ok(result)
    }

    fn config() -> CalculationConfig {
        CalculationConfig {
            calculation_mode: CalculationMode::ScenarioRisk,
            engine: EngineConfig {
                workers: 2,
                concurrency_hint: 4,
                ..EngineConfig::default()
            },
            ..CalculationConfig::default()
        }
    }

    fn inputs() -> Vec<WorkItem<String, (String, f64)>> {
        (0..6)
            .map(|i| {
                let loss_type = if i % 2 == 0 { "structural" } else { "contents" };
                WorkItem::new(1.0, loss_type.to_string(), (format!("a{i}"), 100.0 * f64::from(i)))
            })
            .collect()
    }

    #[test]
    fn losses_per_realization_and_type() {
        init_test_logger();
        let mut sink = MemorySink::new();
        let job = RiskJob {
            inputs: inputs(),
            context: Scenario {
                damage_ratios: vec![0.1, 0.5],
            },
            core,
        };
        let output = Calculator::ScenarioRisk.run_risk(&config(), job, &mut sink).unwrap();

        assert_eq!(output.losses_by_key.len(), 4);
        let names = sink.names().collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "losses/rlz-0000/asset-loss/contents",
                "losses/rlz-0000/asset-loss/structural",
                "losses/rlz-0001/asset-loss/contents",
                "losses/rlz-0001/asset-loss/structural",
            ]
        );
        let structural = sink
            .get("losses/rlz-0001/asset-loss/structural")
            .and_then(Dataset::as_losses)
            .unwrap();
        assert_eq!(structural.assets().len(), 3);
        assert_eq!(structural.assets()["a4"].mean, 200.0);
    }

    #[test]
    fn hazard_calculator_rejects_risk_jobs() {
        let job = RiskJob {
            inputs: inputs(),
            context: Scenario {
                damage_ratios: vec![0.1],
            },
            core,
        };
        let err = Calculator::Classical
            .run_risk(&config(), job, &mut MemorySink::new())
            .unwrap_err();
        assert!(matches!(err, Error::ModeMismatch { job: "risk", .. }));
    }
}
