use crate::algebra::{MergeConflict, MergeValue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// Category of a scenario loss output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LossKind {
    /// Per-asset ground-up losses.
    #[serde(rename = "asset-loss")]
    AssetLoss,
    /// Ground-up losses aggregated over all assets, per event.
    #[serde(rename = "agg")]
    Aggregate,
    /// Per-asset insured losses.
    #[serde(rename = "asset-ins")]
    AssetInsured,
    /// Insured losses aggregated over all assets, per event.
    #[serde(rename = "ins")]
    Insured,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssetLoss => "asset-loss",
            Self::Aggregate => "agg",
            Self::AssetInsured => "asset-ins",
            Self::Insured => "ins",
        }
    }
}

impl Display for LossKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a loss table within one realization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LossKey {
    pub kind: LossKind,
    /// `structural`, `nonstructural`, `contents`, ...
    pub loss_type: String,
}

impl LossKey {
    pub fn new(kind: LossKind, loss_type: impl Into<String>) -> Self {
        Self {
            kind,
            loss_type: loss_type.into(),
        }
    }
}

impl Display for LossKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.loss_type)
    }
}

/// Mean and standard deviation of the losses of one asset across events.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AssetLoss {
    pub mean: f64,
    pub stddev: f64,
}

/// Losses produced by one or more blocks of risk inputs.
///
/// Every asset belongs to exactly one risk input, so merging two tables takes
/// the union of their assets; an asset present in both means the same input
/// was processed twice.  Aggregate losses are summed event by event, with the
/// empty vector as identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LossTable {
    assets: BTreeMap<String, AssetLoss>,
    aggregate: Vec<f64>,
}

impl LossTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_assets(assets: impl IntoIterator<Item = (String, AssetLoss)>) -> Self {
        Self {
            assets: assets.into_iter().collect(),
            aggregate: Vec::new(),
        }
    }

    pub fn from_aggregate(aggregate: Vec<f64>) -> Self {
        Self {
            assets: BTreeMap::new(),
            aggregate,
        }
    }

    pub fn assets(&self) -> &BTreeMap<String, AssetLoss> {
        &self.assets
    }

    /// Aggregate loss per event.
    pub fn aggregate(&self) -> &[f64] {
        &self.aggregate
    }
}

impl MergeValue for LossTable {
    fn merge(&self, other: &Self) -> Result<Self, MergeConflict> {
        let mut result = self.clone();
        result.merge_into(other)?;
        Ok(result)
    }

    fn merge_into(&mut self, other: &Self) -> Result<(), MergeConflict> {
        if let Some(asset) = other.assets.keys().find(|a| self.assets.contains_key(*a)) {
            return Err(MergeConflict::DuplicateEntry(format!("asset {asset}")));
        }
        match (self.aggregate.is_empty(), other.aggregate.is_empty()) {
            (_, true) => {}
            (true, false) => self.aggregate = other.aggregate.clone(),
            (false, false) => {
                if self.aggregate.len() != other.aggregate.len() {
                    return Err(MergeConflict::shape(
                        format!("{} events", self.aggregate.len()),
                        format!("{} events", other.aggregate.len()),
                    ));
                }
                for (a, b) in self.aggregate.iter_mut().zip(other.aggregate.iter()) {
                    *a += b;
                }
            }
        }
        self.assets
            .extend(other.assets.iter().map(|(k, v)| (k.clone(), *v)));
        Ok(())
    }

    fn is_zero(&self) -> bool {
        self.assets.is_empty() && self.aggregate.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{AssetLoss, LossTable};
    use crate::algebra::{MergeConflict, MergeValue};

    fn asset(id: &str, mean: f64) -> (String, AssetLoss) {
        (id.to_string(), AssetLoss { mean, stddev: 0.0 })
    }

    #[test]
    fn union_of_assets() {
        let a = LossTable::from_assets([asset("a1", 10.0)]);
        let b = LossTable::from_assets([asset("a2", 5.0)]);
        let ab = a.merge(&b).unwrap();
        assert_eq!(ab, b.merge(&a).unwrap());
        assert_eq!(ab.assets().len(), 2);
    }

    #[test]
    fn duplicate_asset_conflicts() {
        let a = LossTable::from_assets([asset("a1", 10.0)]);
        assert_eq!(
            a.merge(&a),
            Err(MergeConflict::DuplicateEntry("asset a1".to_string()))
        );
    }

    #[test]
    fn aggregate_losses_add_up() {
        let a = LossTable::from_aggregate(vec![1.0, 2.0]);
        let b = LossTable::from_aggregate(vec![3.0, 4.0]);
        assert_eq!(a.merge(&b).unwrap().aggregate(), &[4.0, 6.0]);
        assert_eq!(a.merge(&LossTable::new()).unwrap(), a);
        assert!(a.merge(&LossTable::from_aggregate(vec![1.0])).is_err());
    }
}
