//! Output features and layer collections.

use std::collections::BTreeMap;
use std::sync::Arc;

use geo_types::Geometry;

use crate::value::Properties;

/// A styled output feature: a geometry plus computed properties.
///
/// Geometries are shared; transforms that change a feature's geometry
/// replace the handle rather than mutating shared data.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Arc<Geometry<f64>>,
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Arc<Geometry<f64>>, properties: Properties) -> Self {
        Feature { geometry, properties }
    }
}

pub type FeatureCollection = Vec<Feature>;

/// The per-tile output: layer name to feature collection, iterated in
/// stable order.
pub type Layers = BTreeMap<String, FeatureCollection>;
