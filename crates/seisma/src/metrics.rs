//! Engine metrics.
//!
//! The constants defined in this module are the names of metrics the engine
//! maintains via [`metrics`] crate interfaces.  Without an installed recorder
//! updating them costs nothing.

use ::metrics::{describe_counter, describe_histogram, Unit as MetricUnit};
use std::sync::Once;

/// Total number of blocks handed to the core function.
pub const BLOCKS_DISPATCHED: &str = "seisma_blocks_dispatched";

/// Wall-clock duration of a single core function invocation.
pub const BLOCK_DURATION: &str = "seisma_block_duration_seconds";

/// Weight of the blocks produced by the partitioner.
pub const BLOCK_WEIGHT: &str = "seisma_block_weight";

/// Total number of output tiles scattered into a full result.
pub const TILES_PROCESSED: &str = "seisma_tiles_processed";

/// Number of times a worker pool was torn down and respawned.
pub const POOL_RECYCLES: &str = "seisma_pool_recycles";

static DESCRIBE: Once = Once::new();

/// Registers descriptions of all engine metrics with the installed recorder.
///
/// Called whenever a worker pool is created; only the first call has an
/// effect.
pub(crate) fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            BLOCKS_DISPATCHED,
            MetricUnit::Count,
            "Number of blocks evaluated by a core function."
        );
        describe_histogram!(
            BLOCK_DURATION,
            MetricUnit::Seconds,
            "Time spent in the core function per block."
        );
        describe_histogram!(BLOCK_WEIGHT, "Total weight of the work items of a block.");
        describe_counter!(
            TILES_PROCESSED,
            MetricUnit::Count,
            "Number of output tiles computed and scattered."
        );
        describe_counter!(
            POOL_RECYCLES,
            MetricUnit::Count,
            "Number of worker pool restarts."
        );
    });
}
