use crate::{
    metrics::{BLOCKS_DISPATCHED, BLOCK_DURATION, BLOCK_WEIGHT},
    runtime::{dispatch::CallMeasurement, worker_index},
};
use ::metrics::{counter, histogram};
use enum_map::{Enum, EnumMap};
use seisma_types::config::EngineConfig;
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug_span, info};
use uuid::Uuid;

/// Stage of a computation whose wall-clock time is tracked separately.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Partition,
    Dispatch,
    Reduce,
    Scatter,
    Aggregate,
    Store,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Partition => "partition",
            Self::Dispatch => "dispatch",
            Self::Reduce => "reduce",
            Self::Scatter => "scatter",
            Self::Aggregate => "aggregate",
            Self::Store => "store",
        };
        f.write_str(name)
    }
}

/// Performance and context handle of one computation.
///
/// Owned by the code driving the computation; core functions only ever see a
/// [`TaskMonitor`] derived from it.
#[derive(Debug)]
pub struct Monitor {
    id: Uuid,
    operation: Arc<str>,
    config: Arc<EngineConfig>,
    phases: EnumMap<Phase, Duration>,
    blocks: usize,
    items: usize,
    weight: f64,
    busy: Duration,
    slowest: Option<CallMeasurement>,
}

impl Monitor {
    pub fn new(operation: &str, config: Arc<EngineConfig>) -> Self {
        Self {
            id: Uuid::now_v7(),
            operation: Arc::from(operation),
            config,
            phases: EnumMap::default(),
            blocks: 0,
            items: 0,
            weight: 0.0,
            busy: Duration::ZERO,
            slowest: None,
        }
    }

    /// Returns a monitor for a sub-computation, such as one tile, sharing
    /// this monitor's configuration.  Fold it back with [`Monitor::absorb`].
    pub fn child(&self, operation: &str) -> Self {
        Self::new(operation, self.config.clone())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    /// Runs `f`, adding its duration to `phase`.
    pub fn measure<R>(&mut self, phase: Phase, f: impl FnOnce() -> R) -> R {
        let _span = debug_span!("phase", operation = %self.operation, %phase).entered();
        let start = Instant::now();
        let result = f();
        self.phases[phase] += start.elapsed();
        result
    }

    pub(crate) fn add_time(&mut self, phase: Phase, duration: Duration) {
        self.phases[phase] += duration;
    }

    pub fn phase_time(&self, phase: Phase) -> Duration {
        self.phases[phase]
    }

    /// Number of core function invocations recorded so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Total weight of the blocks recorded so far.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// The invocation that took longest.
    pub fn slowest(&self) -> Option<&CallMeasurement> {
        self.slowest.as_ref()
    }

    /// Returns the read-only handle passed to the core function for block
    /// `block`.
    pub fn task(&self, block: usize) -> TaskMonitor {
        TaskMonitor {
            monitor_id: self.id,
            operation: self.operation.clone(),
            config: self.config.clone(),
            block,
        }
    }

    pub(crate) fn record_call(&mut self, call: &CallMeasurement) {
        counter!(BLOCKS_DISPATCHED).increment(1);
        histogram!(BLOCK_DURATION).record(call.duration.as_secs_f64());
        histogram!(BLOCK_WEIGHT).record(call.weight);

        self.blocks += 1;
        self.items += call.n_items;
        self.weight += call.weight;
        self.busy += call.duration;
        if self
            .slowest
            .as_ref()
            .map_or(true, |slowest| call.duration > slowest.duration)
        {
            self.slowest = Some(call.clone());
        }
    }

    /// Adds the timings and call statistics of `child` to this monitor.
    pub fn absorb(&mut self, child: Monitor) {
        for (phase, duration) in child.phases {
            self.phases[phase] += duration;
        }
        self.blocks += child.blocks;
        self.items += child.items;
        self.weight += child.weight;
        self.busy += child.busy;
        if let Some(call) = child.slowest {
            if self
                .slowest
                .as_ref()
                .map_or(true, |slowest| call.duration > slowest.duration)
            {
                self.slowest = Some(call);
            }
        }
    }

    pub fn log_summary(&self) {
        let phases = self
            .phases
            .iter()
            .filter(|(_, duration)| !duration.is_zero())
            .map(|(phase, duration)| format!("{phase}={duration:.3?}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!(
            "{} [{}]: {} blocks, {} items, weight {:.1}, busy {:.3?}; {phases}",
            self.operation, self.id, self.blocks, self.items, self.weight, self.busy
        );
        if let Some(slowest) = &self.slowest {
            info!(
                "{}: slowest block {} (group {}, {} items, weight {:.1}) took {:.3?}",
                self.operation,
                slowest.block,
                slowest.group,
                slowest.n_items,
                slowest.weight,
                slowest.duration
            );
        }
    }
}

/// The view of a [`Monitor`] given to one core function invocation.
#[derive(Clone, Debug)]
pub struct TaskMonitor {
    monitor_id: Uuid,
    operation: Arc<str>,
    config: Arc<EngineConfig>,
    block: usize,
}

impl TaskMonitor {
    /// Identifier of the computation this invocation belongs to.
    pub fn monitor_id(&self) -> Uuid {
        self.monitor_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Index of the block being processed.
    pub fn block(&self) -> usize {
        self.block
    }

    /// Pool worker running the invocation; `None` in the calling thread.
    pub fn worker(&self) -> Option<usize> {
        worker_index()
    }
}

#[cfg(test)]
mod tests {
    use super::{Monitor, Phase};
    use crate::runtime::CallMeasurement;
    use seisma_types::config::EngineConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn call(block: usize, millis: u64) -> CallMeasurement {
        CallMeasurement {
            block,
            group: "0".to_string(),
            n_items: 2,
            weight: 1.5,
            worker: None,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn child_is_absorbed() {
        let mut monitor = Monitor::new("classical", Arc::new(EngineConfig::default()));
        monitor.record_call(&call(0, 5));

        let mut child = monitor.child("tile 0");
        assert_ne!(child.id(), monitor.id());
        child.record_call(&call(1, 9));
        child.measure(Phase::Reduce, || ());
        monitor.absorb(child);

        assert_eq!(monitor.blocks(), 2);
        assert_eq!(monitor.weight(), 3.0);
        assert_eq!(monitor.slowest().map(|c| c.block), Some(1));
    }

    #[test]
    fn task_monitor_shares_context() {
        let config = Arc::new(EngineConfig {
            workers: 3,
            ..EngineConfig::default()
        });
        let monitor = Monitor::new("scenario_risk", config);
        let task = monitor.task(4);
        assert_eq!(task.block(), 4);
        assert_eq!(task.monitor_id(), monitor.id());
        assert_eq!(task.config().workers, 3);
        assert_eq!(task.operation(), "scenario_risk");
        assert_eq!(task.worker(), None);
    }
}
