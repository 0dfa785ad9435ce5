//! Calculation configuration.
//!
//! This module defines the configuration consumed by the engine.  The whole
//! tree can be deserialized from a JSON document; fields that are omitted
//! take the defaults documented on each field.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::ops::Range;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Default number of tiles a tiling calculation may split its sites into.
pub const DEFAULT_MAX_TILE_COUNT: usize = 64;

/// Error produced while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("unknown calculation mode '{0}'")]
    UnknownMode(String),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Identifies the pipeline that runs a calculation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    /// Classical PSHA: parallelize over sources, reduce by value.
    #[default]
    Classical,

    /// Classical PSHA split into independent site tiles, reduced by position.
    ClassicalTiling,

    /// Scenario risk: parallelize over risk inputs, collect losses per
    /// realization.
    ScenarioRisk,
}

impl CalculationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classical => "classical",
            Self::ClassicalTiling => "classical_tiling",
            Self::ScenarioRisk => "scenario_risk",
        }
    }

    /// Returns `true` for modes that produce hazard curves.
    pub fn is_hazard(&self) -> bool {
        matches!(self, Self::Classical | Self::ClassicalTiling)
    }
}

impl Display for CalculationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "classical" => Ok(Self::Classical),
            "classical_tiling" => Ok(Self::ClassicalTiling),
            "scenario_risk" => Ok(Self::ScenarioRisk),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Parallelism and resource settings of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker threads in the pool.
    ///
    /// `0`, the default, uses one worker per available CPU.
    pub workers: usize,

    /// Number of blocks the work items are partitioned into.
    ///
    /// `0` or `1` disables partitioning: all work items form a single block
    /// that is evaluated in the calling thread.
    pub concurrency_hint: usize,

    /// Upper bound on the number of tiles a tiling calculation uses.
    ///
    /// `0` means no bound other than the number of output points.
    pub max_tile_count: usize,

    /// Number of tiles evaluated at the same time.  Tiles are processed in
    /// waves of this size.  Defaults to 1.
    pub tile_concurrency: usize,

    /// Tear down and respawn the worker pool between tile waves to release
    /// memory held by worker-local state.
    pub recycle_pool: bool,

    /// Optionally, CPU numbers to pin worker threads to.  Ignored unless at
    /// least as many CPUs as workers are listed.
    pub pin_cpus: Vec<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            concurrency_hint: 0,
            max_tile_count: DEFAULT_MAX_TILE_COUNT,
            tile_concurrency: 1,
            recycle_pool: false,
            pin_cpus: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Returns the number of worker threads to spawn.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Returns the number of tiles used for `n_points` output points.
    pub fn tile_count(&self, n_points: usize) -> usize {
        let mut tiles = self.concurrency_hint.max(1);
        if self.max_tile_count > 0 {
            tiles = tiles.min(self.max_tile_count);
        }
        tiles.min(n_points.max(1))
    }
}

/// Intensity measure types and their levels, in declaration order.
///
/// Hazard curves store the levels of all IMTs side by side, so the curve of a
/// site has [`Imtls::n_levels`] values and the levels of an IMT occupy the
/// range returned by [`Imtls::range`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Imtls(IndexMap<String, Vec<f64>>);

impl Imtls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, imt: impl Into<String>, levels: Vec<f64>) -> Self {
        self.0.insert(imt.into(), levels);
        self
    }

    /// Total number of levels across all IMTs.
    pub fn n_levels(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn levels(&self, imt: &str) -> Option<&[f64]> {
        self.0.get(imt).map(Vec::as_slice)
    }

    /// Position of the levels of `imt` within a site's curve.
    pub fn range(&self, imt: &str) -> Option<Range<usize>> {
        let mut start = 0;
        for (name, levels) in self.0.iter() {
            if name == imt {
                return Some(start..start + levels.len());
            }
            start += levels.len();
        }
        None
    }

    /// Iterates over `(imt, levels, range within a curve)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64], Range<usize>)> {
        let mut start = 0;
        self.0.iter().map(move |(name, levels)| {
            let range = start..start + levels.len();
            start = range.end;
            (name.as_str(), levels.as_slice(), range)
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (imt, levels, _) in self.iter() {
            if levels.is_empty() {
                return Err(ConfigError::invalid(
                    "intensity_measure_types_and_levels",
                    format!("no levels for {imt}"),
                ));
            }
            if levels.iter().any(|l| !(l.is_finite() && *l > 0.0)) {
                return Err(ConfigError::invalid(
                    "intensity_measure_types_and_levels",
                    format!("levels for {imt} must be positive"),
                ));
            }
            if levels.windows(2).any(|w| w[0] >= w[1]) {
                return Err(ConfigError::invalid(
                    "intensity_measure_types_and_levels",
                    format!("levels for {imt} must be strictly increasing"),
                ));
            }
        }
        Ok(())
    }
}

/// Full configuration of one calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculationConfig {
    /// Pipeline to run.
    pub calculation_mode: CalculationMode,

    /// Parallelism settings.
    #[serde(flatten)]
    pub engine: EngineConfig,

    /// Intensity measure types and levels.
    #[serde(rename = "intensity_measure_types_and_levels")]
    pub imtls: Imtls,

    /// Store the curves of every realization, not only the statistics.
    pub individual_curves: bool,

    /// Compute the weighted mean of the realizations.
    pub mean_hazard_curves: bool,

    /// Quantiles to compute across realizations, each in `[0, 1]`.
    pub quantile_hazard_curves: Vec<f64>,

    /// Number of logic tree paths to sample.  `0` enumerates the full tree.
    pub number_of_logic_tree_samples: usize,

    /// Seed of the logic tree sampler.
    pub random_seed: u64,

    /// Probabilities of exceedance used for hazard maps and spectra.
    pub poes: Vec<f64>,

    /// Compute hazard maps from the stored curves.
    pub hazard_maps: bool,

    /// Compute uniform hazard spectra from the hazard maps.
    pub uniform_hazard_spectra: bool,
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            calculation_mode: CalculationMode::default(),
            engine: EngineConfig::default(),
            imtls: Imtls::default(),
            individual_curves: false,
            mean_hazard_curves: true,
            quantile_hazard_curves: Vec::new(),
            number_of_logic_tree_samples: 0,
            random_seed: 42,
            poes: Vec::new(),
            hazard_maps: false,
            uniform_hazard_spectra: false,
        }
    }
}

impl CalculationConfig {
    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Returns `true` if realizations are sampled, in which case their
    /// weights are implicit and statistics are unweighted.
    pub fn is_sampling(&self) -> bool {
        self.number_of_logic_tree_samples > 0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(q) = self
            .quantile_hazard_curves
            .iter()
            .find(|q| !(0.0..=1.0).contains(*q))
        {
            return Err(ConfigError::invalid(
                "quantile_hazard_curves",
                format!("{q} is not in [0, 1]"),
            ));
        }
        if let Some(poe) = self.poes.iter().find(|p| !(**p > 0.0 && **p <= 1.0)) {
            return Err(ConfigError::invalid(
                "poes",
                format!("{poe} is not in (0, 1]"),
            ));
        }
        if (self.hazard_maps || self.uniform_hazard_spectra) && self.poes.is_empty() {
            return Err(ConfigError::invalid(
                "poes",
                "hazard maps and uniform hazard spectra require at least one poe",
            ));
        }
        if self.engine.tile_concurrency == 0 {
            return Err(ConfigError::invalid("tile_concurrency", "must be at least 1"));
        }
        if self.calculation_mode.is_hazard() {
            if self.imtls.is_empty() {
                return Err(ConfigError::invalid(
                    "intensity_measure_types_and_levels",
                    "a hazard calculation needs at least one IMT",
                ));
            }
            self.imtls.validate()?;
        }
        if self.number_of_logic_tree_samples > 0 && self.mean_hazard_curves {
            log::debug!(
                "sampling {} logic tree paths: statistics use implicit equal weights",
                self.number_of_logic_tree_samples
            );
        }
        Ok(())
    }
}
