use crate::{
    calculators::{Calculator, HazardCore, HazardJob, HazardOutput, RiskCore, RiskJob, RiskOutput},
    metrics::describe_metrics,
    output::DatasetSink,
    Error,
};
use seisma_types::config::CalculationConfig;
use std::fmt::Debug;
use std::path::Path;
use tracing::info;

/// A validated calculation configuration and the calculator it selects.
#[derive(Clone, Debug)]
pub struct Engine {
    config: CalculationConfig,
    calculator: Calculator,
}

impl Engine {
    /// Validates `config` and resolves its calculator.
    pub fn new(config: CalculationConfig) -> Result<Self, Error> {
        config.validate()?;
        describe_metrics();
        let calculator = Calculator::for_mode(config.calculation_mode);
        info!(
            "{}: {} workers, concurrency hint {}",
            config.calculation_mode,
            config.engine.effective_workers(),
            config.engine.concurrency_hint
        );
        Ok(Self { config, calculator })
    }

    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        Self::new(CalculationConfig::from_json_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        Self::new(CalculationConfig::from_json_file(path)?)
    }

    pub fn config(&self) -> &CalculationConfig {
        &self.config
    }

    pub fn calculator(&self) -> Calculator {
        self.calculator
    }

    /// Runs a hazard calculation and stores its datasets in `sink`.
    pub fn run_hazard<S, F>(
        &self,
        job: HazardJob<S, F>,
        sink: &mut dyn DatasetSink,
    ) -> Result<HazardOutput, Error>
    where
        S: Clone + Send + Sync + 'static,
        F: HazardCore<S>,
    {
        self.calculator.run_hazard(&self.config, job, sink)
    }

    /// Runs a risk calculation and stores its loss tables in `sink`.
    pub fn run_risk<K, P, C, F>(
        &self,
        job: RiskJob<K, P, C, F>,
        sink: &mut dyn DatasetSink,
    ) -> Result<RiskOutput, Error>
    where
        K: Ord + Clone + Debug + Send + 'static,
        P: Send + 'static,
        C: Send + Sync + 'static,
        F: RiskCore<K, P, C>,
    {
        self.calculator.run_risk(&self.config, job, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::{calculators::Calculator, Error};
    use seisma_types::config::ConfigError;

    #[test]
    fn resolves_calculator() {
        let engine = Engine::from_json_str(
            r#"{
                "calculation_mode": "classical_tiling",
                "intensity_measure_types_and_levels": {"PGA": [0.1, 0.2]}
            }"#,
        )
        .unwrap();
        assert_eq!(engine.calculator(), Calculator::ClassicalTiling);
    }

    #[test]
    fn rejects_invalid_config() {
        let err = Engine::from_json_str(r#"{"calculation_mode": "classical"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
    }
}
