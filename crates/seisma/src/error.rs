use crate::algebra::MergeConflict;
use crate::runtime::WorkerPanicInfo;
use seisma_types::config::{CalculationMode, ConfigError};
use seisma_types::error::DetailedError;
use serde_json::{json, Value as JsonValue};
use std::borrow::Cow;
use thiserror::Error as ThisError;

/// Errors that abort a computation.
///
/// None of these are recoverable within a run: a partial result that does
/// not cover every work item is not a meaningful hazard or risk estimate.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A work item carries a weight that cannot be balanced (negative, NaN or
    /// infinite).  Detected before anything is dispatched.
    #[error("work item {item} of group {group} has invalid weight {weight}")]
    Partition {
        item: usize,
        group: String,
        weight: f64,
    },

    /// The core function returned an error for a block.
    #[error("core function failed on block {block} (group {group}, {items} items): {source:#}")]
    Worker {
        block: usize,
        group: String,
        items: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The core function panicked while processing a block.
    #[error("core function panicked on block {block} (group {group}): {info}")]
    WorkerPanic {
        block: usize,
        group: String,
        info: WorkerPanicInfo,
    },

    /// Realization weights do not form a usable distribution.
    #[error("cannot aggregate realizations: {0}")]
    Aggregation(String),

    /// Two values merged under the same key disagree on their shape.
    #[error("inconsistent values for key {key}: {conflict}")]
    Consistency { key: String, conflict: MergeConflict },

    /// The logic tree cannot produce realizations.
    #[error("invalid logic tree: {0}")]
    LogicTree(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A job was submitted to a calculator of the wrong family.
    #[error("calculator '{calculator}' cannot run a {job} job")]
    ModeMismatch {
        calculator: CalculationMode,
        job: &'static str,
    },

    /// The worker pool could not be started or lost its workers.
    #[error("worker pool error: {0}")]
    Pool(String),

    /// The persistence collaborator rejected a dataset.
    #[error("failed to store dataset '{dataset}': {source:#}")]
    Sink {
        dataset: String,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn consistency(key: &impl std::fmt::Debug, conflict: MergeConflict) -> Self {
        Self::Consistency {
            key: format!("{key:?}"),
            conflict,
        }
    }
}

impl DetailedError for Error {
    fn error_code(&self) -> Cow<'static, str> {
        match self {
            Self::Partition { .. } => Cow::from("PartitionError"),
            Self::Worker { .. } => Cow::from("WorkerError"),
            Self::WorkerPanic { .. } => Cow::from("WorkerPanic"),
            Self::Aggregation(_) => Cow::from("AggregationError"),
            Self::Consistency { .. } => Cow::from("ConsistencyError"),
            Self::LogicTree(_) => Cow::from("LogicTreeError"),
            Self::Config(_) => Cow::from("ConfigError"),
            Self::ModeMismatch { .. } => Cow::from("ModeMismatch"),
            Self::Pool(_) => Cow::from("PoolError"),
            Self::Sink { .. } => Cow::from("SinkError"),
        }
    }

    fn details(&self) -> JsonValue {
        match self {
            Self::Partition { item, group, weight } => {
                json!({ "item": item, "group": group, "weight": weight.to_string() })
            }
            Self::Worker {
                block,
                group,
                items,
                ..
            } => json!({ "block": block, "group": group, "items": items }),
            Self::WorkerPanic { block, group, info } => {
                json!({ "block": block, "group": group, "panic": info.to_string() })
            }
            Self::Consistency { key, conflict } => {
                json!({ "key": key, "conflict": conflict.to_string() })
            }
            Self::ModeMismatch { calculator, job } => {
                json!({ "calculator": calculator.as_str(), "job": job })
            }
            Self::Sink { dataset, .. } => json!({ "dataset": dataset }),
            _ => JsonValue::Null,
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Partition { .. }
                | Self::Aggregation(_)
                | Self::LogicTree(_)
                | Self::Config(_)
                | Self::ModeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::algebra::MergeConflict;
    use seisma_types::error::{DetailedError, ErrorResponse};

    #[test]
    fn worker_error_names_block() {
        let error = Error::Worker {
            block: 7,
            group: "3".to_string(),
            items: 12,
            source: anyhow::anyhow!("magnitude out of range"),
        };
        let response = ErrorResponse::from_error_nolog(&error);
        assert_eq!(response.error_code, "WorkerError");
        assert!(response.message.contains("block 7"));
        assert!(response.message.contains("magnitude out of range"));
        assert_eq!(response.details["block"], 7);
        assert!(!error.is_user_error());
    }

    #[test]
    fn consistency_key_is_rendered() {
        let error = Error::consistency(
            &(1u32, "BooreAtkinson2008"),
            MergeConflict::Shape {
                expected: "2x3".to_string(),
                found: "2x4".to_string(),
            },
        );
        assert_eq!(error.error_code(), "ConsistencyError");
        assert!(error.to_string().contains("BooreAtkinson2008"));
    }
}
