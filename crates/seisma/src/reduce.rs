//! Folding partial accumulators into a final one.
//!
//! Two combination rules exist.  Partial results of blocks cover the same
//! output points and are merged value by value ([`reduce`]).  Partial results
//! of tiles cover disjoint output points and are written at their position
//! ([`reduce_scattered`]).  The caller picks the rule that matches how the
//! partials were produced.

use crate::{
    algebra::{MergeValue, Scatter},
    tiling::Tile,
    Accumulator, Error,
};
use std::fmt::Debug;

/// Merges every partial into `initial`.
///
/// The result does not depend on the order of `partials`.
pub fn reduce<K, V>(
    partials: impl IntoIterator<Item = Accumulator<K, V>>,
    initial: Accumulator<K, V>,
) -> Result<Accumulator<K, V>, Error>
where
    K: Ord + Clone + Debug,
    V: MergeValue,
{
    partials
        .into_iter()
        .try_fold(initial, |acc, partial| acc.merge_owned(partial))
}

/// Writes each tile's partial at the tile's offset in `full`.
pub fn reduce_scattered<K, V>(
    parts: impl IntoIterator<Item = (Tile, Accumulator<K, V>)>,
    full: Accumulator<K, V>,
) -> Result<Accumulator<K, V>, Error>
where
    K: Ord + Clone + Debug,
    V: Scatter,
{
    parts
        .into_iter()
        .try_fold(full, |full, (tile, part)| full.scatter(&tile, part))
}
