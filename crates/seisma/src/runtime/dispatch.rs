use crate::{
    partition::Block,
    runtime::{worker_index, Monitor, Phase, TaskMonitor, WorkerPanicInfo, WorkerPool},
    Error,
};
use crossbeam::channel::unbounded;
use seisma_types::config::EngineConfig;
use serde::Serialize;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Timing and size of one core function invocation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallMeasurement {
    pub block: usize,
    pub group: String,
    pub n_items: usize,
    pub weight: f64,
    /// Pool worker that ran the invocation, `None` for the calling thread.
    pub worker: Option<usize>,
    pub duration: Duration,
}

/// The result of one block, with the measurement of the call that produced
/// it.
#[derive(Clone, Debug)]
pub struct Partial<A> {
    pub value: A,
    pub measurement: CallMeasurement,
}

enum Outcome<A> {
    Done(Partial<A>),
    Failed(Error),
    // Not run because another block already failed.
    Skipped,
}

/// Runs a core function once per block.
///
/// With `concurrency_hint > 1` blocks are evaluated by a [`WorkerPool`]
/// owned by the dispatcher; otherwise they are evaluated one after the other
/// in the calling thread and no pool is created.
///
/// The first block that fails aborts the computation: blocks that have not
/// started yet are skipped, results that already arrived are dropped, and
/// the error is returned once every queued block has been accounted for.
/// There are no retries.
pub struct Dispatcher {
    config: Arc<EngineConfig>,
    pool: Option<WorkerPool>,
}

impl Dispatcher {
    pub fn new(config: Arc<EngineConfig>) -> Result<Self, Error> {
        let pool = if config.concurrency_hint > 1 {
            Some(WorkerPool::new(&config)?)
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }

    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }

    /// Replaces the pool's workers with fresh threads.  Computed results do
    /// not depend on whether or when this is called.
    pub fn recycle(&mut self) -> Result<(), Error> {
        match &mut self.pool {
            Some(pool) => pool.recycle(),
            None => Ok(()),
        }
    }

    /// Evaluates `core` on every block and returns the partial results in
    /// completion order.
    ///
    /// `context` is shared read-only by all invocations.
    pub fn dispatch<K, T, C, A, F>(
        &self,
        core: F,
        blocks: Vec<Block<K, T>>,
        context: Arc<C>,
        monitor: &mut Monitor,
    ) -> Result<Vec<Partial<A>>, Error>
    where
        K: Debug + Send + 'static,
        T: Send + 'static,
        C: Send + Sync + 'static,
        A: Send + 'static,
        F: Fn(Block<K, T>, &C, &TaskMonitor) -> anyhow::Result<A> + Send + Sync + 'static,
    {
        let mut partials = Vec::with_capacity(blocks.len());
        self.for_each_result(core, blocks, context, monitor, |partial| {
            partials.push(partial);
            Ok(())
        })?;
        Ok(partials)
    }

    /// Evaluates `core` on every block and folds each partial result into
    /// `initial` with `fold` as soon as it arrives.
    ///
    /// `fold` must be insensitive to the order of its inputs.  If any block
    /// or any call to `fold` fails, no accumulated value is returned.
    pub fn apply_reduce<K, T, C, A, R, F, G>(
        &self,
        core: F,
        blocks: Vec<Block<K, T>>,
        context: Arc<C>,
        initial: R,
        mut fold: G,
        monitor: &mut Monitor,
    ) -> Result<R, Error>
    where
        K: Debug + Send + 'static,
        T: Send + 'static,
        C: Send + Sync + 'static,
        A: Send + 'static,
        F: Fn(Block<K, T>, &C, &TaskMonitor) -> anyhow::Result<A> + Send + Sync + 'static,
        G: FnMut(R, A) -> Result<R, Error>,
    {
        let mut acc = Some(initial);
        let mut folding = Duration::ZERO;
        let result = self.for_each_result(core, blocks, context, monitor, |partial| {
            if let Some(current) = acc.take() {
                let start = Instant::now();
                acc = Some(fold(current, partial.value)?);
                folding += start.elapsed();
            }
            Ok(())
        });
        monitor.add_time(Phase::Reduce, folding);
        result?;
        acc.ok_or_else(|| Error::Aggregation("reduction produced no value".to_string()))
    }

    fn for_each_result<K, T, C, A, F, S>(
        &self,
        core: F,
        blocks: Vec<Block<K, T>>,
        context: Arc<C>,
        monitor: &mut Monitor,
        mut sink: S,
    ) -> Result<(), Error>
    where
        K: Debug + Send + 'static,
        T: Send + 'static,
        C: Send + Sync + 'static,
        A: Send + 'static,
        F: Fn(Block<K, T>, &C, &TaskMonitor) -> anyhow::Result<A> + Send + Sync + 'static,
        S: FnMut(Partial<A>) -> Result<(), Error>,
    {
        let n_blocks = blocks.len();
        let Some(pool) = &self.pool else {
            // Serial: run in this thread, stop at the first failure.
            let start = Instant::now();
            let mut result = Ok(());
            for block in blocks {
                let task = monitor.task(block.index);
                match run_block(&core, block, context.as_ref(), &task, None) {
                    Outcome::Done(partial) => {
                        monitor.record_call(&partial.measurement);
                        result = sink(partial);
                    }
                    Outcome::Failed(error) => result = Err(error),
                    Outcome::Skipped => {}
                }
                if result.is_err() {
                    break;
                }
            }
            monitor.add_time(Phase::Dispatch, start.elapsed());
            if let Err(error) = result {
                error!("{}: aborting serial computation: {error}", monitor.operation());
                return Err(error);
            }
            debug!(
                "{}: evaluated {n_blocks} blocks serially in {:.3?}",
                monitor.operation(),
                start.elapsed()
            );
            return Ok(());
        };

        let start = Instant::now();
        let core = Arc::new(core);
        let cancel = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = unbounded();
        let mut queued = 0;
        let mut first_error = None;

        for block in blocks {
            let task = monitor.task(block.index);
            let core = core.clone();
            let context = context.clone();
            let job_cancel = cancel.clone();
            let sender = sender.clone();
            let job = move || {
                let outcome = if job_cancel.load(Ordering::Acquire) {
                    Outcome::Skipped
                } else {
                    run_block(core.as_ref(), block, context.as_ref(), &task, Some(&*job_cancel))
                };
                // The receiver is gone only if the dispatcher has already
                // given up on this computation.
                let _ = sender.send(outcome);
            };
            match pool.execute(job) {
                Ok(()) => queued += 1,
                Err(error) => {
                    cancel.store(true, Ordering::Release);
                    first_error = Some(error);
                    break;
                }
            }
        }
        drop(sender);

        let mut skipped = 0;
        for _ in 0..queued {
            let Ok(outcome) = receiver.recv() else {
                cancel.store(true, Ordering::Release);
                return Err(first_error
                    .unwrap_or_else(|| Error::Pool("worker pool disconnected".to_string())));
            };
            match outcome {
                Outcome::Done(partial) => {
                    if first_error.is_none() {
                        monitor.record_call(&partial.measurement);
                        if let Err(error) = sink(partial) {
                            cancel.store(true, Ordering::Release);
                            first_error = Some(error);
                        }
                    }
                }
                Outcome::Failed(error) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Outcome::Skipped => skipped += 1,
            }
        }

        monitor.add_time(Phase::Dispatch, start.elapsed());
        match first_error {
            Some(error) => {
                error!(
                    "{}: aborting computation, {skipped} of {n_blocks} blocks skipped: {error}",
                    monitor.operation()
                );
                Err(error)
            }
            None => {
                debug!(
                    "{}: evaluated {n_blocks} blocks on {} workers in {:.3?}",
                    monitor.operation(),
                    pool.n_workers(),
                    start.elapsed()
                );
                Ok(())
            }
        }
    }
}

/// Runs `core` on one block, turning errors and panics into [`Error`]s that
/// name the block.  Sets `cancel` on failure.
fn run_block<K, T, C, A, F>(
    core: &F,
    block: Block<K, T>,
    context: &C,
    task: &TaskMonitor,
    cancel: Option<&AtomicBool>,
) -> Outcome<A>
where
    K: Debug,
    F: Fn(Block<K, T>, &C, &TaskMonitor) -> anyhow::Result<A>,
{
    let index = block.index;
    let group = block.group_label();
    let n_items = block.len();
    let weight = block.weight;
    let worker = worker_index();

    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| core(block, context, task)));
    let duration = start.elapsed();

    let error = match result {
        Ok(Ok(value)) => {
            return Outcome::Done(Partial {
                value,
                measurement: CallMeasurement {
                    block: index,
                    group,
                    n_items,
                    weight,
                    worker,
                    duration,
                },
            })
        }
        Ok(Err(source)) => Error::Worker {
            block: index,
            group,
            items: n_items,
            source,
        },
        Err(payload) => Error::WorkerPanic {
            block: index,
            group,
            info: WorkerPanicInfo::new(&*payload, worker),
        },
    };
    if let Some(cancel) = cancel {
        cancel.store(true, Ordering::Release);
    }
    Outcome::Failed(error)
}
