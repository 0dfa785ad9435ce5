//! Keyed collections of mergeable values: the unit of reduction.

use crate::{
    algebra::{MergeConflict, MergeValue, Scatter},
    tiling::Tile,
    Error,
};
use std::collections::{btree_map, BTreeMap};
use std::fmt::Debug;

/// A mapping from keys to values that merge associatively and commutatively.
///
/// Keys are typically `(group, variant)` pairs, such as a tectonic region
/// model and a ground motion model.  An accumulator is never modified by
/// assigning a key directly: it is built from entries (entries sharing a key
/// are merged) and then only combined with other accumulators through
/// [`Accumulator::merge`], which merges the values of shared keys and keeps
/// the keys present on one side only.
///
/// Entries iterate in key order, so two accumulators holding the same
/// entries compare, print, and serialize identically regardless of the order
/// in which partial results arrived.
#[derive(Clone, Debug, PartialEq)]
pub struct Accumulator<K, V> {
    entries: BTreeMap<K, V>,
}

impl<K, V> Default for Accumulator<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K, V> Accumulator<K, V>
where
    K: Ord + Clone + Debug,
    V: MergeValue,
{
    /// Returns an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an accumulator that maps every key in `keys` to `zero`.
    pub fn with_zeros(keys: impl IntoIterator<Item = K>, zero: &V) -> Self {
        Self {
            entries: keys.into_iter().map(|k| (k, zero.clone())).collect(),
        }
    }

    pub fn singleton(key: K, value: V) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(key, value);
        Self { entries }
    }

    /// Builds an accumulator from `(key, value)` pairs, merging the values
    /// of repeated keys.
    pub fn from_entries(entries: impl IntoIterator<Item = (K, V)>) -> Result<Self, Error> {
        let mut result = BTreeMap::new();
        for (key, value) in entries {
            merge_entry(&mut result, key, value)?;
        }
        Ok(Self { entries: result })
    }

    /// Returns the combination of `self` and `other`.
    pub fn merge(&self, other: &Self) -> Result<Self, Error> {
        self.clone().merge_owned(other.clone())
    }

    /// Like [`Accumulator::merge`], but consumes both operands to reuse
    /// their storage.
    pub fn merge_owned(self, other: Self) -> Result<Self, Error> {
        let (mut large, small) = if self.entries.len() >= other.entries.len() {
            (self, other)
        } else {
            (other, self)
        };
        for (key, value) in small.entries {
            merge_entry(&mut large.entries, key, value)?;
        }
        Ok(large)
    }

    /// Writes the rows of every value of `part` at the position of `tile`
    /// inside the value of the same key in `self`.
    ///
    /// Values are overwritten, not merged: each tile owns a disjoint slice of
    /// the output.  Every key of `part` must already be present in `self`.
    pub fn scatter(mut self, tile: &Tile, part: Self) -> Result<Self, Error>
    where
        V: Scatter,
    {
        for (key, value) in part.entries {
            if value.n_rows() != tile.size {
                return Err(Error::consistency(
                    &key,
                    MergeConflict::shape(
                        format!("{} rows for tile {}", tile.size, tile.ordinal),
                        format!("{} rows", value.n_rows()),
                    ),
                ));
            }
            let Some(target) = self.entries.get_mut(&key) else {
                return Err(Error::consistency(
                    &key,
                    MergeConflict::UnknownKey(format!("produced by tile {}", tile.ordinal)),
                ));
            };
            target
                .scatter(tile.offset, &value)
                .map_err(|conflict| Error::consistency(&key, conflict))?;
        }
        Ok(self)
    }

    /// Returns the rows of every value that fall inside `tile`.
    pub fn restrict(&self, tile: &Tile) -> Result<Self, Error>
    where
        V: Scatter,
    {
        let entries = self
            .entries
            .iter()
            .map(|(key, value)| {
                value
                    .slice(tile.offset, tile.size)
                    .map(|part| (key.clone(), part))
                    .map_err(|conflict| Error::consistency(key, conflict))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Keys whose value is not the merge identity.
    pub fn nonzero_keys(&self) -> impl Iterator<Item = &K> {
        self.entries
            .iter()
            .filter(|(_, v)| !v.is_zero())
            .map(|(k, _)| k)
    }

    /// Finalizes the accumulator.
    pub fn into_inner(self) -> BTreeMap<K, V> {
        self.entries
    }
}

impl<K, V> IntoIterator for Accumulator<K, V> {
    type Item = (K, V);
    type IntoIter = btree_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn merge_entry<K, V>(entries: &mut BTreeMap<K, V>, key: K, value: V) -> Result<(), Error>
where
    K: Ord + Debug,
    V: MergeValue,
{
    match entries.entry(key) {
        btree_map::Entry::Vacant(entry) => {
            entry.insert(value);
        }
        btree_map::Entry::Occupied(mut entry) => {
            if let Err(conflict) = entry.get_mut().merge_into(&value) {
                return Err(Error::consistency(entry.key(), conflict));
            }
        }
    }
    Ok(())
}
