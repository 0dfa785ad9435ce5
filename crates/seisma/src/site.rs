use crate::tiling::{Tile, TileScoped};
use serde::{Deserialize, Serialize};

/// A location at which hazard is computed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: u32,
    pub lon: f64,
    pub lat: f64,
    /// Average shear-wave velocity of the top 30 m, in m/s.
    pub vs30: f64,
}

/// The sites of a calculation, in output order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteCollection {
    sites: Vec<Site>,
}

impl SiteCollection {
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Site> {
        self.sites.get(index)
    }
}

impl FromIterator<Site> for SiteCollection {
    fn from_iter<I: IntoIterator<Item = Site>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl TileScoped for SiteCollection {
    fn n_points(&self) -> usize {
        self.len()
    }

    fn restrict(&self, tile: &Tile) -> Self {
        Self::new(self.sites[tile.range()].to_vec())
    }
}
