use crate::{
    metrics::{describe_metrics, POOL_RECYCLES},
    Error,
};
use ::metrics::counter;
use core_affinity::{get_core_ids, CoreId};
use crossbeam::channel::{unbounded, Sender};
use indexmap::IndexSet;
use itertools::Itertools;
use seisma_types::config::EngineConfig;
use std::cell::Cell;
use std::thread::{Builder, JoinHandle};
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    // Index of the pool worker running on this thread.
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Returns the index of the pool worker running the current thread, or `None`
/// outside of a worker pool.
pub fn worker_index() -> Option<usize> {
    WORKER_INDEX.with(|index| index.get())
}

/// A fixed-size set of worker threads executing jobs from a shared queue.
///
/// The pool is an explicit resource: dropping it, or calling
/// [`WorkerPool::shutdown`], joins all workers after the jobs already queued
/// have run.  [`WorkerPool::recycle`] replaces the workers with fresh threads,
/// releasing whatever memory the old ones held in thread-local state.
pub struct WorkerPool {
    n_workers: usize,
    core_ids: Vec<CoreId>,
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    generation: usize,
}

impl WorkerPool {
    /// Spawns `config.effective_workers()` threads, pinned to
    /// `config.pin_cpus` when enough CPUs are listed.
    pub fn new(config: &EngineConfig) -> Result<Self, Error> {
        describe_metrics();

        let n_workers = config.effective_workers();
        let mut pool = Self {
            n_workers,
            core_ids: map_pin_cpus(n_workers, &config.pin_cpus),
            sender: None,
            workers: Vec::new(),
            generation: 0,
        };
        pool.spawn()?;
        Ok(pool)
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }

    /// Number of times the pool has been recycled.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Queues `job` for execution by the next idle worker.
    pub fn execute<F>(&self, job: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return Err(Error::Pool("worker pool has been shut down".to_string()));
        };
        sender
            .send(Box::new(job))
            .map_err(|_| Error::Pool("all workers have exited".to_string()))
    }

    /// Waits for the current workers to finish their queued jobs and replaces
    /// them with new threads.
    pub fn recycle(&mut self) -> Result<(), Error> {
        self.shutdown();
        self.generation += 1;
        counter!(POOL_RECYCLES).increment(1);
        debug!(
            "recycling worker pool (generation {}, {} workers)",
            self.generation, self.n_workers
        );
        self.spawn()
    }

    /// Closes the job queue and joins all workers.  Idempotent.
    pub fn shutdown(&mut self) {
        self.sender = None;
        for (index, handle) in self.workers.drain(..).enumerate() {
            if handle.join().is_err() {
                warn!("worker thread {index} terminated with a panic");
            }
        }
    }

    fn spawn(&mut self) -> Result<(), Error> {
        let (sender, receiver) = unbounded::<Job>();
        for index in 0..self.n_workers {
            let receiver = receiver.clone();
            let core_id = self.core_ids.get(index).copied();
            let handle = Builder::new()
                .name(format!("seisma-worker-{index}"))
                .spawn(move || {
                    if let Some(core_id) = core_id {
                        if !core_affinity::set_for_current(core_id) {
                            warn!("failed to pin worker {index} to core {}", core_id.id);
                        }
                    }
                    WORKER_INDEX.with(|worker| worker.set(Some(index)));
                    for job in receiver.iter() {
                        job();
                    }
                })
                .map_err(|error| Error::Pool(format!("failed to spawn worker {index}: {error}")));
            match handle {
                Ok(handle) => self.workers.push(handle),
                Err(error) => {
                    drop(sender);
                    self.shutdown();
                    return Err(error);
                }
            }
        }
        self.sender = Some(sender);
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Returns the cores to pin `n_workers` workers to, or an empty list if
/// `pin_cpus` cannot be honored.
fn map_pin_cpus(n_workers: usize, pin_cpus: &[usize]) -> Vec<CoreId> {
    let pin_cpus = pin_cpus
        .iter()
        .copied()
        .map(|id| CoreId { id })
        .collect::<IndexSet<_>>();
    if pin_cpus.len() < n_workers {
        if !pin_cpus.is_empty() {
            warn!(
                "ignoring CPU pinning request because {n_workers} workers require {n_workers} pinned CPUs but only {} were specified",
                pin_cpus.len()
            );
        }
        return Vec::new();
    }

    let Some(core_ids) = get_core_ids() else {
        warn!("ignoring CPU pinning request because this system's core ids list could not be obtained");
        return Vec::new();
    };
    let core_ids = core_ids.into_iter().collect::<IndexSet<_>>();

    let missing_cpus = pin_cpus.difference(&core_ids).copied().collect::<Vec<_>>();
    if !missing_cpus.is_empty() {
        warn!(
            "ignoring CPU pinning request because requested CPUs {} are not available (available CPUs are: {})",
            display_core_ids(missing_cpus.iter()),
            display_core_ids(core_ids.iter())
        );
        return Vec::new();
    }

    let cpus = pin_cpus.into_iter().take(n_workers).collect::<Vec<_>>();
    info!("pinning workers to CPUs {}", display_core_ids(cpus.iter()));
    cpus
}

fn display_core_ids<'a>(iter: impl Iterator<Item = &'a CoreId>) -> String {
    format!("{}", iter.map(|core| core.id).format(", "))
}

#[cfg(test)]
mod tests {
    use super::{map_pin_cpus, worker_index, WorkerPool};
    use crossbeam::channel::unbounded;
    use seisma_types::config::EngineConfig;

    fn config(workers: usize) -> EngineConfig {
        EngineConfig {
            workers,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn jobs_run_on_workers() {
        let pool = WorkerPool::new(&config(3)).unwrap();
        let (sender, receiver) = unbounded();
        for i in 0..10 {
            let sender = sender.clone();
            pool.execute(move || sender.send((i, worker_index())).unwrap())
                .unwrap();
        }
        drop(sender);
        let mut results: Vec<_> = receiver.iter().collect();
        results.sort();
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|(_, w)| w.is_some_and(|w| w < 3)));
        assert_eq!(worker_index(), None);
    }

    #[test]
    fn recycle_replaces_workers() {
        let mut pool = WorkerPool::new(&config(2)).unwrap();
        pool.recycle().unwrap();
        pool.recycle().unwrap();
        assert_eq!(pool.generation(), 2);

        let (sender, receiver) = unbounded();
        pool.execute(move || sender.send(7).unwrap()).unwrap();
        assert_eq!(receiver.recv().unwrap(), 7);
    }

    #[test]
    fn execute_after_shutdown_fails() {
        let mut pool = WorkerPool::new(&config(1)).unwrap();
        pool.shutdown();
        assert!(pool.execute(|| {}).is_err());
    }

    #[test]
    fn insufficient_pinning_is_ignored() {
        assert!(map_pin_cpus(4, &[0, 1]).is_empty());
        assert!(map_pin_cpus(2, &[]).is_empty());
    }
}
