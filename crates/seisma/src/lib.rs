//! A weighted task partitioning and reduction engine for probabilistic
//! seismic hazard and risk calculations.
//!
//! A calculation is a list of weighted [`WorkItem`]s (seismic sources or
//! risk inputs) and a pure *core function* that turns a block of items into
//! a keyed [`Accumulator`] of partial results.  The engine
//!
//! 1. [partitions](partition::partition) the items into blocks of roughly
//!    equal weight without mixing group keys,
//! 2. [dispatches](runtime::Dispatcher) the blocks to a pool of worker
//!    threads,
//! 3. [reduces](reduce) the partial results with an associative and
//!    commutative merge, and
//! 4. combines them into per-realization results and their
//!    [statistics](stats).
//!
//! When the output does not fit in memory at once, the
//! [`TileCoordinator`](tiling::TileCoordinator) splits it by site and runs
//! the pipeline tile by tile.
//!
//! The [`Engine`] ties these together for the calculation modes of
//! [`CalculationMode`](seisma_types::config::CalculationMode).

mod accumulator;
mod error;
mod metrics;

pub mod algebra;
pub mod calculators;
pub mod engine;
pub mod hazard_maps;
pub mod logic_tree;
pub mod output;
pub mod partition;
pub mod reduce;
pub mod runtime;
pub mod site;
pub mod stats;
pub mod tiling;
pub mod utils;


pub use accumulator::Accumulator;
pub use engine::Engine;
pub use error::Error;
pub use partition::{Block, WorkItem};

// Re-export the types shared with collaborators.
pub use seisma_types::{config, error::DetailedError, error::ErrorResponse};

pub use crate::metrics::{
    BLOCKS_DISPATCHED, BLOCK_DURATION, BLOCK_WEIGHT, POOL_RECYCLES, TILES_PROCESSED,
};
