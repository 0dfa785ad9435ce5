//! Splitting weighted work items into balanced blocks.
//!
//! Items are first grouped by key.  Each group is then spread over as many
//! bins as its share of the total weight requires, using the greedy
//! largest-first heuristic: items are visited by decreasing weight and each
//! one goes to the currently lightest bin of its group.  This does not find
//! the optimal packing, but it bounds the heaviest block by
//! `total_weight / target + max_item_weight`.

use crate::Error;
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt::Debug;
use tracing::debug;

/// A unit of parallelizable work.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkItem<K, P> {
    /// Expected computation cost.  Only used for balancing.
    pub weight: f64,
    /// Items with the same key are processed together and their results are
    /// tagged with the key.
    pub group_key: K,
    pub payload: P,
}

impl<K, P> WorkItem<K, P> {
    pub fn new(weight: f64, group_key: K, payload: P) -> Self {
        Self {
            weight,
            group_key,
            payload,
        }
    }
}

/// Work items assigned to a single invocation of a core function.
#[derive(Clone, Debug, PartialEq)]
pub struct Block<K, T> {
    /// Position of the block in the output of [`partition_by`].
    pub index: usize,
    /// Group key shared by all items, or `None` when partitioning was
    /// disabled and the block holds every item.
    pub key: Option<K>,
    /// Sum of the weights of `items`.
    pub weight: f64,
    pub items: Vec<T>,
}

impl<K, T> Block<K, T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<K: Debug, T> Block<K, T> {
    /// Human-readable identity of the block's group, used in errors.
    pub fn group_label(&self) -> String {
        match &self.key {
            Some(key) => format!("{key:?}"),
            None => "*".to_string(),
        }
    }
}

/// Partitions [`WorkItem`]s by their `weight` and `group_key` fields.
pub fn partition<K, P>(
    items: Vec<WorkItem<K, P>>,
    target_blocks: usize,
) -> Result<Vec<Block<K, WorkItem<K, P>>>, Error>
where
    K: Ord + Clone + Debug,
{
    partition_by(
        items,
        target_blocks,
        |item| item.weight,
        |item| item.group_key.clone(),
    )
}

/// Splits `items` into blocks of similar weight, never mixing items of
/// different keys in a block.
///
/// `weight` and `key` are the accessors of the cost and the grouping key of
/// an item.  With `target_blocks <= 1` all items form a single block.  An
/// empty input yields no blocks.
///
/// Fails if any weight is negative or not finite.
pub fn partition_by<T, K, W, F>(
    items: Vec<T>,
    target_blocks: usize,
    weight: W,
    key: F,
) -> Result<Vec<Block<K, T>>, Error>
where
    K: Ord + Clone + Debug,
    W: Fn(&T) -> f64,
    F: Fn(&T) -> K,
{
    for (index, item) in items.iter().enumerate() {
        let w = weight(item);
        if !(w.is_finite() && w >= 0.0) {
            return Err(Error::Partition {
                item: index,
                group: format!("{:?}", key(item)),
                weight: w,
            });
        }
    }

    if items.is_empty() {
        return Ok(Vec::new());
    }

    if target_blocks <= 1 {
        let total = items.iter().map(&weight).sum();
        return Ok(vec![Block {
            index: 0,
            key: None,
            weight: total,
            items,
        }]);
    }

    let mut groups: BTreeMap<K, Vec<(f64, T)>> = BTreeMap::new();
    let mut total_weight = 0.0;
    for item in items {
        let w = weight(&item);
        total_weight += w;
        groups.entry(key(&item)).or_default().push((w, item));
    }

    let bin_capacity = total_weight / target_blocks as f64;
    let mut blocks = Vec::new();
    for (group_key, mut group) in groups {
        let group_weight: f64 = group.iter().map(|(w, _)| w).sum();
        let n_bins = bins_for_group(group_weight, bin_capacity, group.len(), target_blocks);

        // Stable sort: items of equal weight keep their input order.
        group.sort_by(|(a, _), (b, _)| b.total_cmp(a));

        let mut bins: Vec<(f64, Vec<T>)> = (0..n_bins).map(|_| (0.0, Vec::new())).collect();
        // Min-heap on (load, item count, bin): the lightest bin, then the one
        // with fewest items, so zero-weight items still spread out.
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f64>, usize, usize)>> = (0..n_bins)
            .map(|bin| Reverse((OrderedFloat(0.0), 0, bin)))
            .collect();

        for (w, item) in group {
            let Some(Reverse((load, count, bin))) = heap.pop() else {
                unreachable!("a group has at least one bin");
            };
            bins[bin].0 += w;
            bins[bin].1.push(item);
            heap.push(Reverse((OrderedFloat(load.0 + w), count + 1, bin)));
        }

        for (weight, items) in bins {
            blocks.push(Block {
                index: blocks.len(),
                key: Some(group_key.clone()),
                weight,
                items,
            });
        }
    }

    debug!(
        "partitioned weight {total_weight} into {} blocks (target {target_blocks})",
        blocks.len()
    );
    Ok(blocks)
}

/// Number of bins a group of `len` items weighing `group_weight` is spread
/// over.
fn bins_for_group(group_weight: f64, bin_capacity: f64, len: usize, target_blocks: usize) -> usize {
    let bins = if bin_capacity > 0.0 {
        (group_weight / bin_capacity).ceil() as usize
    } else {
        // All weights are zero: balance on item count.
        target_blocks
    };
    bins.clamp(1, len)
}
