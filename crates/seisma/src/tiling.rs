//! Splitting the output domain into tiles.
//!
//! When one pass over all output points needs more memory than a worker can
//! hold, the output is cut into contiguous tiles.  Each tile runs the whole
//! partition, dispatch, and reduce pipeline over the complete set of work
//! items, with a context restricted to the tile's points, and its result is
//! scattered back into the full output by position.

use crate::{
    algebra::Scatter,
    metrics::TILES_PROCESSED,
    partition::partition_by,
    reduce::reduce_scattered,
    runtime::{Dispatcher, Monitor, Phase, TaskMonitor},
    Accumulator, Block, Error,
};
use ::metrics::counter;
use serde::Serialize;
use std::fmt::Debug;
use std::ops::Range;
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// A contiguous slice of the output domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Tile {
    pub ordinal: usize,
    /// Position of the first output point of the tile.
    pub offset: usize,
    /// Number of output points in the tile.
    pub size: usize,
}

impl Tile {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Splits `0..n_points` into at most `n_tiles` contiguous tiles whose sizes
/// differ by at most one.  Larger tiles come first.
///
/// There are never empty tiles: `n_points == 0` yields no tiles and
/// `n_tiles` is capped at `n_points`.
pub fn split_tiles(n_points: usize, n_tiles: usize) -> Vec<Tile> {
    if n_points == 0 {
        return Vec::new();
    }
    let n_tiles = n_tiles.clamp(1, n_points);
    let base = n_points / n_tiles;
    let larger = n_points % n_tiles;

    let mut offset = 0;
    (0..n_tiles)
        .map(|ordinal| {
            let size = base + usize::from(ordinal < larger);
            let tile = Tile {
                ordinal,
                offset,
                size,
            };
            offset += size;
            tile
        })
        .collect()
}

/// A context whose data is indexed by output point.
pub trait TileScoped: Sized {
    fn n_points(&self) -> usize;

    /// Returns the context seen by a computation of `tile` only.  Output
    /// point `i` of the result is point `tile.offset + i` of `self`.
    fn restrict(&self, tile: &Tile) -> Self;
}

/// What happened to one tile.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TileReport<K> {
    pub tile: Tile,
    /// Keys with a non-zero contribution inside the tile.
    pub effective_keys: Vec<K>,
    pub blocks: usize,
    pub weight: f64,
}

/// Result of [`TileCoordinator::run`].
#[derive(Clone, Debug)]
pub struct Tiled<K, V> {
    pub output: Accumulator<K, V>,
    pub tiles: Vec<TileReport<K>>,
}

/// Runs a computation tile by tile and assembles the full output.
///
/// Up to `tile_concurrency` tiles are computed at the same time, each from
/// its own thread sharing the dispatcher's worker pool.  With `recycle_pool`
/// set the pool is recycled after every wave of tiles.
pub struct TileCoordinator<'a> {
    dispatcher: &'a mut Dispatcher,
    tile_concurrency: usize,
    recycle_pool: bool,
}

impl<'a> TileCoordinator<'a> {
    pub fn new(dispatcher: &'a mut Dispatcher) -> Self {
        let config = dispatcher.config().clone();
        Self {
            dispatcher,
            tile_concurrency: config.tile_concurrency.max(1),
            recycle_pool: config.recycle_pool,
        }
    }

    /// Computes `full`, an accumulator pre-initialized with full-size zero
    /// values, one tile at a time.
    ///
    /// Every tile partitions the complete `items` (by `weight` and `key`),
    /// evaluates `core` on the blocks with `context` restricted to the tile,
    /// and merges the block results into the zero values of the tile.  The
    /// tile's result is then scattered into `full`.
    #[allow(clippy::too_many_arguments)]
    pub fn run<T, G, C, K, V, W, F, P>(
        &mut self,
        items: &[T],
        weight: W,
        key: P,
        context: &C,
        core: F,
        full: Accumulator<K, V>,
        monitor: &mut Monitor,
    ) -> Result<Tiled<K, V>, Error>
    where
        T: Clone + Send + Sync + 'static,
        G: Ord + Clone + Debug + Send + 'static,
        C: TileScoped + Send + Sync + 'static,
        K: Ord + Clone + Debug + Send + Sync + 'static,
        V: Scatter + Sync,
        W: Fn(&T) -> f64 + Sync,
        P: Fn(&T) -> G + Sync,
        F: Fn(Block<G, T>, &C, &TaskMonitor) -> anyhow::Result<Accumulator<K, V>>
            + Send
            + Sync
            + 'static,
    {
        let n_points = context.n_points();
        let tiles = split_tiles(n_points, monitor.config().tile_count(n_points));
        info!(
            "{}: {} output points in {} tiles, {} at a time",
            monitor.operation(),
            n_points,
            tiles.len(),
            self.tile_concurrency
        );

        let core = Arc::new(core);
        let mut output = full;
        let mut reports = Vec::with_capacity(tiles.len());
        let waves = tiles.chunks(self.tile_concurrency).collect::<Vec<_>>();
        for (wave_index, wave) in waves.iter().enumerate() {
            let pipeline = TilePipeline {
                dispatcher: &*self.dispatcher,
                items,
                weight: &weight,
                key: &key,
                context,
                core: &core,
                full: &output,
            };

            let results = if wave.len() == 1 {
                let mut child = monitor.child(&format!("{} tile {}", monitor.operation(), wave[0].ordinal));
                vec![pipeline.run(wave[0], &mut child).map(|part| (part, child))]
            } else {
                let operation = monitor.operation().to_string();
                let children = wave
                    .iter()
                    .map(|tile| monitor.child(&format!("{operation} tile {}", tile.ordinal)))
                    .collect::<Vec<_>>();
                thread::scope(|scope| {
                    let handles = wave
                        .iter()
                        .zip(children)
                        .map(|(tile, mut child)| {
                            let pipeline = &pipeline;
                            scope.spawn(move || pipeline.run(*tile, &mut child).map(|part| (part, child)))
                        })
                        .collect::<Vec<_>>();
                    handles
                        .into_iter()
                        .map(|handle| {
                            handle.join().unwrap_or_else(|_| {
                                Err(Error::Pool("tile thread terminated with a panic".to_string()))
                            })
                        })
                        .collect::<Vec<_>>()
                })
            };

            let mut parts = Vec::with_capacity(wave.len());
            for (tile, result) in wave.iter().zip(results) {
                let (part, child) = result?;
                reports.push(TileReport {
                    tile: *tile,
                    effective_keys: part.nonzero_keys().cloned().collect(),
                    blocks: child.blocks(),
                    weight: child.weight(),
                });
                monitor.absorb(child);
                parts.push((*tile, part));
            }
            output = monitor.measure(Phase::Scatter, || reduce_scattered(parts, output))?;
            counter!(TILES_PROCESSED).increment(wave.len() as u64);
            for report in &reports[reports.len() - wave.len()..] {
                info!(
                    "{}: processed tile {} ({} points, {} effective keys, {} blocks)",
                    monitor.operation(),
                    report.tile.ordinal,
                    report.tile.size,
                    report.effective_keys.len(),
                    report.blocks
                );
            }

            if self.recycle_pool && wave_index + 1 < waves.len() {
                self.dispatcher.recycle()?;
            }
        }

        Ok(Tiled {
            output,
            tiles: reports,
        })
    }
}

/// Inputs shared by all tiles of one [`TileCoordinator::run`].
struct TilePipeline<'p, T, C, K, V, W, P, F> {
    dispatcher: &'p Dispatcher,
    items: &'p [T],
    weight: &'p W,
    key: &'p P,
    context: &'p C,
    core: &'p Arc<F>,
    full: &'p Accumulator<K, V>,
}

impl<T, G, C, K, V, W, P, F> TilePipeline<'_, T, C, K, V, W, P, F>
where
    T: Clone + Send + Sync + 'static,
    G: Ord + Clone + Debug + Send + 'static,
    C: TileScoped + Send + Sync + 'static,
    K: Ord + Clone + Debug + Send + 'static,
    V: Scatter,
    W: Fn(&T) -> f64,
    P: Fn(&T) -> G,
    F: Fn(Block<G, T>, &C, &TaskMonitor) -> anyhow::Result<Accumulator<K, V>>
        + Send
        + Sync
        + 'static,
{
    fn run(&self, tile: Tile, monitor: &mut Monitor) -> Result<Accumulator<K, V>, Error> {
        let blocks = monitor.measure(Phase::Partition, || {
            partition_by(
                self.items.to_vec(),
                self.dispatcher.config().concurrency_hint,
                self.weight,
                self.key,
            )
        })?;
        let context = Arc::new(self.context.restrict(&tile));
        let initial = self.full.restrict(&tile)?;
        debug!(
            "tile {}: {} blocks over points {:?}",
            tile.ordinal,
            blocks.len(),
            tile.range()
        );

        let core = self.core.clone();
        self.dispatcher.apply_reduce(
            move |block: Block<G, T>, context: &C, task: &TaskMonitor| (*core)(block, context, task),
            blocks,
            context,
            initial,
            |acc, partial| acc.merge_owned(partial),
            monitor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{split_tiles, Tile, TileCoordinator, TileScoped};
    use crate::{
        runtime::{Dispatcher, Monitor, TaskMonitor},
        Accumulator, Block, Error,
    };
    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use seisma_types::config::EngineConfig;
    use std::sync::{Arc, Mutex};

    #[test]
    fn near_equal_tiles() {
        let tiles = split_tiles(10, 3);
        assert_eq!(
            tiles,
            vec![
                Tile { ordinal: 0, offset: 0, size: 4 },
                Tile { ordinal: 1, offset: 4, size: 3 },
                Tile { ordinal: 2, offset: 7, size: 3 },
            ]
        );
        assert!(split_tiles(0, 3).is_empty());
        assert_eq!(split_tiles(2, 5).len(), 2);
        assert_eq!(split_tiles(4, 0), vec![Tile { ordinal: 0, offset: 0, size: 4 }]);
    }

    proptest! {
        #[test]
        fn tiles_cover_the_output(n_points in 0usize..500, n_tiles in 0usize..40) {
            let tiles = split_tiles(n_points, n_tiles);
            let mut next = 0;
            for (ordinal, tile) in tiles.iter().enumerate() {
                prop_assert_eq!(tile.ordinal, ordinal);
                prop_assert_eq!(tile.offset, next);
                prop_assert!(tile.size > 0);
                next = tile.offset + tile.size;
            }
            prop_assert_eq!(next, n_points);
            if let (Some(max), Some(min)) = (
                tiles.iter().map(|t| t.size).max(),
                tiles.iter().map(|t| t.size).min(),
            ) {
                prop_assert!(max - min <= 1);
            }
        }
    }

    // One scalar per point; work item `i` adds `i * x` to point `x` when
    // the point is even.
    struct Points {
        xs: Vec<f64>,
    }

    impl TileScoped for Points {
        fn n_points(&self) -> usize {
            self.xs.len()
        }

        fn restrict(&self, tile: &Tile) -> Self {
            Self {
                xs: self.xs[tile.range()].to_vec(),
            }
        }
    }

    fn core(
        block: Block<u8, (u8, f64)>,
        points: &Points,
        _: &TaskMonitor,
    ) -> anyhow::Result<Accumulator<u8, Vec<f64>>> {
        let entries = block.items.into_iter().map(|(group, factor)| {
            let values = points
                .xs
                .iter()
                .map(|x| if *x as u64 % 2 == 0 { factor * x } else { 0.0 })
                .collect::<Vec<_>>();
            (group, values)
        });
        Ok(Accumulator::from_entries(entries)?)
    }

    fn run(config: EngineConfig) -> (Accumulator<u8, Vec<f64>>, usize) {
        let config = Arc::new(config);
        let points = Points {
            xs: (0..11).map(f64::from).collect(),
        };
        let items: Vec<(u8, f64)> = (0..8).map(|i| ((i % 3) as u8, f64::from(i))).collect();
        let full = Accumulator::with_zeros(0..3u8, &vec![0.0; 11]);

        let mut dispatcher = Dispatcher::new(config.clone()).unwrap();
        let mut monitor = Monitor::new("tiles", config);
        let tiled = TileCoordinator::new(&mut dispatcher)
            .run(&items, |item| item.1 + 1.0, |item| item.0, &points, core, full, &mut monitor)
            .unwrap();
        (tiled.output, tiled.tiles.len())
    }

    #[test]
    fn tiled_equals_untiled() {
        let (untiled, n) = run(EngineConfig {
            concurrency_hint: 1,
            ..EngineConfig::default()
        });
        assert_eq!(n, 1);

        for (concurrency_hint, tile_concurrency, recycle_pool) in
            [(4, 1, false), (4, 2, true), (3, 3, false)]
        {
            let (tiled, n) = run(EngineConfig {
                workers: 2,
                concurrency_hint,
                tile_concurrency,
                recycle_pool,
                ..EngineConfig::default()
            });
            assert_eq!(n, concurrency_hint);
            assert_eq!(tiled, untiled);
        }
    }

    // Eleven points in four tiles starting at offsets 0, 3, 6 and 9.  The
    // tile at `broken_offset` fails in the way selected by `failure`.
    #[derive(Clone, Copy)]
    enum Failure {
        Error,
        CorePanic,
        RestrictPanic,
    }

    struct Flaky {
        offset: usize,
        size: usize,
        broken_offset: usize,
        failure: Failure,
        visited: Arc<Mutex<Vec<usize>>>,
    }

    impl TileScoped for Flaky {
        fn n_points(&self) -> usize {
            self.size
        }

        fn restrict(&self, tile: &Tile) -> Self {
            let offset = self.offset + tile.offset;
            if offset == self.broken_offset && matches!(self.failure, Failure::RestrictPanic) {
                panic!("no sites at offset {offset}");
            }
            Self {
                offset,
                size: tile.size,
                broken_offset: self.broken_offset,
                failure: self.failure,
                visited: self.visited.clone(),
            }
        }
    }

    fn flaky_core(
        block: Block<u8, (u8, f64)>,
        tile: &Flaky,
        _: &TaskMonitor,
    ) -> anyhow::Result<Accumulator<u8, Vec<f64>>> {
        tile.visited.lock().unwrap().push(tile.offset);
        if tile.offset == tile.broken_offset {
            match tile.failure {
                Failure::Error => bail!("tile at {} has no sites", tile.offset),
                Failure::CorePanic => panic!("tile at {} has no sites", tile.offset),
                Failure::RestrictPanic => {}
            }
        }
        let entries = block
            .items
            .into_iter()
            .map(|(group, factor)| (group, vec![factor; tile.size]));
        Ok(Accumulator::from_entries(entries)?)
    }

    fn run_flaky(tile_concurrency: usize, broken_offset: usize, failure: Failure) -> (Error, Vec<usize>) {
        let config = Arc::new(EngineConfig {
            workers: 2,
            concurrency_hint: 4,
            tile_concurrency,
            ..EngineConfig::default()
        });
        let visited = Arc::new(Mutex::new(Vec::new()));
        let context = Flaky {
            offset: 0,
            size: 11,
            broken_offset,
            failure,
            visited: visited.clone(),
        };
        let items: Vec<(u8, f64)> = (0..8).map(|i| ((i % 3) as u8, f64::from(i))).collect();
        let full = Accumulator::with_zeros(0..3u8, &vec![0.0; 11]);

        let mut dispatcher = Dispatcher::new(config.clone()).unwrap();
        let mut monitor = Monitor::new("flaky tiles", config);
        let result = TileCoordinator::new(&mut dispatcher).run(
            &items,
            |item| item.1 + 1.0,
            |item| item.0,
            &context,
            flaky_core,
            full,
            &mut monitor,
        );
        let Err(error) = result else {
            panic!("a broken tile must fail the computation");
        };
        let visited = visited.lock().unwrap().clone();
        (error, visited)
    }

    #[test]
    fn failing_tile_stops_later_waves() {
        let (error, visited) = run_flaky(1, 0, Failure::Error);
        assert!(matches!(error, Error::Worker { .. }), "{error}");
        assert!(visited.iter().all(|offset| *offset == 0), "{visited:?}");

        // Tiles 0 and 3 form the first wave; tiles 6 and 9 never start.
        let (error, visited) = run_flaky(2, 3, Failure::Error);
        assert!(matches!(error, Error::Worker { .. }), "{error}");
        assert!(visited.iter().all(|offset| *offset < 6), "{visited:?}");
    }

    #[test]
    fn panicking_core_fails_the_tile() {
        let (error, visited) = run_flaky(2, 6, Failure::CorePanic);
        assert!(matches!(error, Error::WorkerPanic { .. }), "{error}");
        assert!(visited.contains(&0), "{visited:?}");
    }

    #[test]
    fn panicking_tile_thread_is_a_pool_error() {
        let (error, _) = run_flaky(2, 3, Failure::RestrictPanic);
        assert!(matches!(error, Error::Pool(_)), "{error}");
    }
}
