//! The tile driver: turn an element graph into styled per-layer feature
//! collections.

use std::sync::Arc;

use geo_types::Geometry;

use crate::config::{Config, Layer};
use crate::feature::{Feature, Layers};
use crate::filter::Context;
use crate::geometry::{bound_contains, geometry_type, world_bound, Bound};
use crate::osm::{build_features, ElementType, Graph, Membership, RawFeature};
use crate::postprocess::{set_conditional_names, PostContext};
use crate::value::Value;

/// The layer order tried by single-element evaluation: the most reasonable
/// match first.
const ELEMENT_ORDER: &[&str] = &[
    "pois",
    "roads",
    "buildings",
    "landuse",
    "water",
    "places",
    "boundaries",
    "transit",
    "earth",
];

impl Config {
    /// Process one tile: evaluate every feature of the graph against every
    /// layer, then run the post-processing pipeline.
    ///
    /// The bound clips large geometry and gates label points; the zoom
    /// drives min-zoom filtering and the zoom-dependent passes.
    pub fn process(&self, graph: &Graph, bound: Bound, zoom: u32) -> Layers {
        let features = build_features(graph, &bound);
        let membership = Arc::new(Membership::build(graph));
        self.process_features(&features, membership, bound, zoom)
    }

    /// Evaluate a single element (wrapped in its own graph, along with any
    /// context elements such as its relations) and return the first layer
    /// to produce a feature, with that feature's properties.
    pub fn process_element(&self, graph: &Graph) -> Option<(String, crate::value::Properties)> {
        let layers = self.process(graph, world_bound(), 20);

        let in_order = ELEMENT_ORDER
            .iter()
            .map(|n| n.to_string())
            .chain(
                self.all
                    .iter()
                    .filter(|n| !ELEMENT_ORDER.contains(&n.as_str()))
                    .cloned(),
            );

        for name in in_order {
            if let Some(features) = layers.get(&name) {
                if let Some(feature) = features.first() {
                    return Some((name, feature.properties.clone()));
                }
            }
        }

        None
    }

    fn process_features(
        &self,
        features: &[RawFeature],
        membership: Arc<Membership>,
        bound: Bound,
        zoom: u32,
    ) -> Layers {
        // One context serves every feature of the tile.
        let mut ctx = Context::new();
        ctx.debug = self.debug;
        ctx.membership = membership;

        let mut result = Layers::new();
        for name in &self.all {
            let layer = &self.layers[name];

            let mut output = Vec::new();
            for raw in features {
                // ways intersecting the tile may have interesting nodes
                // outside it; skip the points that fall outside
                if let Geometry::Point(p) = raw.geometry.as_ref() {
                    if !bound_contains(&bound, p) {
                        continue;
                    }
                }

                let Some(feature) = eval_feature(layer, &mut ctx, raw, zoom) else {
                    continue;
                };

                // big polygons may carry label points outside the tile
                if let Geometry::Point(p) = feature.geometry.as_ref() {
                    if !bound_contains(&bound, p) {
                        continue;
                    }
                }

                output.push(feature);
            }

            result.insert(name.clone(), output);
        }

        let pctx = PostContext { zoom: zoom as f64, bound };

        // name fixups the original data source did at load time
        set_conditional_names(&pctx, &mut result);

        for pass in &self.post_processors {
            pass.eval(&pctx, &mut result);
        }

        // the raw tags were only carried for the passes above
        for layer in result.values_mut() {
            for feature in layer.iter_mut() {
                feature.properties.remove("tags");
            }
        }

        result
    }
}

fn eval_feature(
    layer: &Layer,
    ctx: &mut Context,
    raw: &RawFeature,
    zoom: u32,
) -> Option<Feature> {
    let gt = geometry_type(&raw.geometry);
    if !layer.geometry_types.iter().any(|t| t == gt) {
        return None;
    }

    ctx.bind(raw.id, Arc::clone(&raw.geometry), Arc::clone(&raw.tags));

    let matched = layer.filters.iter().find(|f| f.matches(ctx))?;

    // A matched filter without a min_zoom means "explicitly unmatched".
    let min_zoom = matched.min_zoom.as_ref()?.eval_num(ctx);

    // A zoom-12 tile carries features with min_zoom in [0, 13).
    if ((zoom + 1) as f64) < min_zoom {
        return None;
    }

    let mut properties = matched.properties(ctx);
    properties.insert("min_zoom", (min_zoom * 100.0).floor() / 100.0);

    // relations get negative ids by convention
    let id = match raw.id.element {
        ElementType::Relation => -raw.id.id,
        _ => raw.id.id,
    };
    properties.insert("id", id as f64);
    properties.insert("type", raw.id.element.as_str());

    // the original tags are needed during post-processing
    properties.insert("tags", Value::Tags(Arc::clone(&raw.tags)));

    let mut feature = Feature::new(Arc::clone(&raw.geometry), properties);
    for transform in &layer.transforms {
        transform(ctx, &mut feature);
    }

    Some(feature)
}
