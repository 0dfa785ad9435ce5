//! Values that can be combined by the reducer.
//!
//! A value stored in an [`Accumulator`](crate::Accumulator) must merge with
//! another value of the same key through an associative and commutative
//! operation.  The identity of that operation depends on the shape of the
//! value (the number of sites and levels of a set of hazard curves), so it is
//! not a type-level constant: accumulators are pre-initialized with explicit
//! zero values instead.

mod curves;
mod losses;

pub use curves::HazardCurves;
pub use losses::{AssetLoss, LossKey, LossKind, LossTable};

use std::fmt::{Debug, Display};
use thiserror::Error;

/// Reason two values cannot be merged.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MergeConflict {
    /// The values do not have the same shape.
    #[error("expected shape {expected}, found {found}")]
    Shape { expected: String, found: String },

    /// Both values contain an entry that may only occur once.
    #[error("duplicate entry {0}")]
    DuplicateEntry(String),

    /// A positional write targets a key the output does not have.
    #[error("key is not part of the output ({0})")]
    UnknownKey(String),

    /// A positional write does not fit inside the target.
    #[error("{size} rows at offset {offset} do not fit into {len} rows")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len: usize,
    },

    /// The merged value does not fit into the value type.
    #[error("{0} overflows")]
    Overflow(String),
}

impl MergeConflict {
    pub fn shape(expected: impl Display, found: impl Display) -> Self {
        Self::Shape {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// A value with an associative, commutative merge.
///
/// Implementations must satisfy, for values of the same shape:
///
/// ```text
/// a.merge(b) == b.merge(a)
/// a.merge(b).merge(c) == a.merge(b.merge(c))
/// a.merge(zero) == a
/// ```
///
/// where `zero` is the value an accumulator is pre-initialized with.
pub trait MergeValue: Clone + PartialEq + Debug + Send + 'static {
    /// Returns the combination of `self` and `other`.
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict>;

    /// Merges `other` into `self`.
    ///
    /// Equivalent to `*self = self.merge(other)?`; implementations override
    /// it to avoid the allocation.
    fn merge_into(&mut self, other: &Self) -> Result<(), MergeConflict> {
        *self = self.merge(other)?;
        Ok(())
    }

    /// Returns `true` if this value is the identity of `merge`.
    fn is_zero(&self) -> bool;
}

/// A value whose leading axis is a set of output points (sites), which the
/// tile coordinator writes slice by slice.
pub trait Scatter: MergeValue {
    /// Number of output points.
    fn n_rows(&self) -> usize;

    /// Overwrites rows `offset..offset + part.n_rows()` of `self` with the
    /// rows of `part`.
    fn scatter(&mut self, offset: usize, part: &Self) -> Result<(), MergeConflict>;

    /// Returns a copy of rows `offset..offset + size`.
    fn slice(&self, offset: usize, size: usize) -> Result<Self, MergeConflict>;
}

impl MergeValue for i64 {
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
        self.checked_add(*other)
            .ok_or_else(|| MergeConflict::Overflow(format!("{self} + {other}")))
    }

    fn is_zero(&self) -> bool {
        *self == 0
    }
}

impl MergeValue for f64 {
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
        Ok(self + other)
    }

    fn is_zero(&self) -> bool {
        *self == 0.0
    }
}

/// Element-wise sum.
impl MergeValue for Vec<f64> {
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
        let mut result = self.clone();
        result.merge_into(other)?;
        Ok(result)
    }

    fn merge_into(&mut self, other: &Self) -> Result<(), MergeConflict> {
        if self.len() != other.len() {
            return Err(MergeConflict::shape(self.len(), other.len()));
        }
        for (x, y) in self.iter_mut().zip(other.iter()) {
            *x += y;
        }
        Ok(())
    }

    fn is_zero(&self) -> bool {
        self.iter().all(|x| *x == 0.0)
    }
}

impl Scatter for Vec<f64> {
    fn n_rows(&self) -> usize {
        self.len()
    }

    fn scatter(&mut self, offset: usize, part: &Self) -> Result<(), MergeConflict> {
        let end = offset + part.len();
        if end > self.len() {
            return Err(MergeConflict::OutOfBounds {
                offset,
                size: part.len(),
                len: self.len(),
            });
        }
        self[offset..end].copy_from_slice(part);
        Ok(())
    }

    fn slice(&self, offset: usize, size: usize) -> Result<Self, MergeConflict> {
        self.get(offset..offset + size)
            .map(<[f64]>::to_vec)
            .ok_or(MergeConflict::OutOfBounds {
                offset,
                size,
                len: self.len(),
            })
    }
}
