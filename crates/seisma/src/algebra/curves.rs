use crate::algebra::{MergeConflict, MergeValue, Scatter};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::ops::Range;

/// Probabilities of exceedance of a set of sites.
///
/// Stored row-major with shape `(n_sites, n_levels)`, where the levels of all
/// intensity measure types are laid out side by side (see
/// [`Imtls::range`](seisma_types::config::Imtls::range)).
///
/// Two sets of curves computed from independent sources combine as
/// `1 - (1 - a) * (1 - b)`: the probability that at least one of the sources
/// causes an exceedance.  The identity is the all-zero set of curves.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HazardCurves {
    n_sites: usize,
    n_levels: usize,
    poes: Vec<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Shape(usize, usize);

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}

impl HazardCurves {
    /// Returns all-zero curves, the identity of [`MergeValue::merge`].
    pub fn zeros(n_sites: usize, n_levels: usize) -> Self {
        Self {
            n_sites,
            n_levels,
            poes: vec![0.0; n_sites * n_levels],
        }
    }

    pub fn from_poes(n_sites: usize, n_levels: usize, poes: Vec<f64>) -> Result<Self, MergeConflict> {
        if poes.len() != n_sites * n_levels {
            return Err(MergeConflict::shape(
                format!("{} values", n_sites * n_levels),
                format!("{} values", poes.len()),
            ));
        }
        Ok(Self {
            n_sites,
            n_levels,
            poes,
        })
    }

    /// Builds curves from one row of probabilities per site.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MergeConflict> {
        let n_levels = rows.first().map_or(0, Vec::len);
        let mut poes = Vec::with_capacity(rows.len() * n_levels);
        for row in rows {
            if row.len() != n_levels {
                return Err(MergeConflict::shape(
                    format!("{n_levels} levels"),
                    format!("{} levels", row.len()),
                ));
            }
            poes.extend_from_slice(row);
        }
        Ok(Self {
            n_sites: rows.len(),
            n_levels,
            poes,
        })
    }

    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    pub fn n_levels(&self) -> usize {
        self.n_levels
    }

    pub fn poes(&self) -> &[f64] {
        &self.poes
    }

    /// Curves of the same shape holding `poes`.
    pub(crate) fn with_poes(&self, poes: Vec<f64>) -> Self {
        debug_assert_eq!(poes.len(), self.poes.len());
        Self {
            n_sites: self.n_sites,
            n_levels: self.n_levels,
            poes,
        }
    }

    pub fn into_poes(self) -> Vec<f64> {
        self.poes
    }

    /// Curve of site `site`.
    pub fn site(&self, site: usize) -> &[f64] {
        &self.poes[site * self.n_levels..(site + 1) * self.n_levels]
    }

    /// Curves of the sites in `sites`.
    pub fn rows(&self, sites: Range<usize>) -> Self {
        Self {
            n_sites: sites.len(),
            n_levels: self.n_levels,
            poes: self.poes[sites.start * self.n_levels..sites.end * self.n_levels].to_vec(),
        }
    }

    fn shape(&self) -> Shape {
        Shape(self.n_sites, self.n_levels)
    }

    fn check_shape(&self, other: &Self) -> Result<(), MergeConflict> {
        if self.shape() != other.shape() {
            return Err(MergeConflict::shape(self.shape(), other.shape()));
        }
        Ok(())
    }
}

impl MergeValue for HazardCurves {
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
        let mut result = self.clone();
        result.merge_into(other)?;
        Ok(result)
    }

    fn merge_into(&mut self, other: &Self) -> Result<(), MergeConflict> {
        self.check_shape(other)?;
        for (a, b) in self.poes.iter_mut().zip(other.poes.iter()) {
            // 1 - (1 - a) * (1 - b), exact for b == 0
            *a = *a + b - *a * b;
        }
        Ok(())
    }

    fn is_zero(&self) -> bool {
        self.poes.iter().all(|poe| *poe == 0.0)
    }
}

impl Scatter for HazardCurves {
    fn n_rows(&self) -> usize {
        self.n_sites
    }

    fn scatter(&mut self, offset: usize, part: &Self) -> Result<(), MergeConflict> {
        if part.n_levels != self.n_levels {
            return Err(MergeConflict::shape(
                format!("{} levels", self.n_levels),
                format!("{} levels", part.n_levels),
            ));
        }
        if offset + part.n_sites > self.n_sites {
            return Err(MergeConflict::OutOfBounds {
                offset,
                size: part.n_sites,
                len: self.n_sites,
            });
        }
        let start = offset * self.n_levels;
        self.poes[start..start + part.poes.len()].copy_from_slice(&part.poes);
        Ok(())
    }

    fn slice(&self, offset: usize, size: usize) -> Result<Self, MergeConflict> {
        if offset + size > self.n_sites {
            return Err(MergeConflict::OutOfBounds {
                offset,
                size,
                len: self.n_sites,
            });
        }
        Ok(self.rows(offset..offset + size))
    }
}

#[cfg(test)]
mod tests {
    use super::HazardCurves;
    use crate::algebra::{MergeConflict, MergeValue, Scatter};
    use proptest::prelude::*;

    fn curves(n_sites: usize, n_levels: usize) -> impl Strategy<Value = HazardCurves> {
        prop::collection::vec(0.0..1.0f64, n_sites * n_levels)
            .prop_map(move |poes| HazardCurves::from_poes(n_sites, n_levels, poes).unwrap())
    }

    fn assert_close(a: &HazardCurves, b: &HazardCurves) {
        assert_eq!(a.n_sites(), b.n_sites());
        for (x, y) in a.poes().iter().zip(b.poes()) {
            assert!((x - y).abs() < 1e-12, "{x} != {y}");
        }
    }

    #[test]
    fn merge_combines_probabilities() {
        let a = HazardCurves::from_rows(&[vec![0.5, 0.1]]).unwrap();
        let b = HazardCurves::from_rows(&[vec![0.5, 0.0]]).unwrap();
        let c = a.merge(&b).unwrap();
        assert_eq!(c.site(0), &[0.75, 0.1]);
    }

    #[test]
    fn merge_rejects_other_shape() {
        let a = HazardCurves::zeros(2, 3);
        let b = HazardCurves::zeros(2, 4);
        assert_eq!(
            a.merge(&b),
            Err(MergeConflict::shape("(2, 3)", "(2, 4)"))
        );
    }

    #[test]
    fn scatter_rows() {
        let mut full = HazardCurves::zeros(4, 2);
        let part = HazardCurves::from_rows(&[vec![0.3, 0.2], vec![0.4, 0.1]]).unwrap();
        full.scatter(1, &part).unwrap();
        assert_eq!(full.site(0), &[0.0, 0.0]);
        assert_eq!(full.site(2), &[0.4, 0.1]);
        assert_eq!(full.rows(1..3), part);
        assert_eq!(full.slice(1, 2).unwrap(), part);
        assert!(full.scatter(3, &part).is_err());
        assert!(full.slice(3, 2).is_err());
    }

    proptest! {
        #[test]
        fn merge_laws(a in curves(3, 4), b in curves(3, 4), c in curves(3, 4)) {
            assert_close(
                &a.merge(&b).unwrap().merge(&c).unwrap(),
                &a.merge(&b.merge(&c).unwrap()).unwrap(),
            );
            prop_assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
            prop_assert_eq!(a.merge(&HazardCurves::zeros(3, 4)).unwrap(), a);
        }
    }
}
