//! The post-processing passes without a file of their own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use geo::HaversineDistance;
use geo_types::{Geometry, Point};

use super::{has_name, key_is_name, CompileContext, Params, PostContext, PostProcess,
            PostProcessConfig};
use crate::feature::{Feature, Layers};
use crate::filter::{CompileError, Condition, Context};
use crate::geometry::{
    bound_contains, clip_to_bound, has_open_outer_ring, pad_bound_by_factor,
    representative_point, Bound,
};
use crate::matcher::{MatchContext, Matcher};
use crate::ranker::Ranker;
use crate::transform::networks;
use crate::value::{Properties, Value};

/// Sets names for buildings and landuse based on what else the feature
/// appears as. A building that is also a POI or landuse area keeps only
/// its `addr:housename` (the POI carries the label); a landuse area that
/// is also a POI loses its name the same way.
pub fn set_conditional_names(_ctx: &PostContext, layers: &mut Layers) {
    let ids_of = |layer: Option<&Vec<Feature>>| -> HashSet<(i64, String)> {
        layer
            .into_iter()
            .flatten()
            .map(|f| {
                (
                    f.properties.num_or("id", 0.0) as i64,
                    f.properties.str_or("type", "").to_string(),
                )
            })
            .collect()
    };

    let poi_ids = ids_of(layers.get("pois"));
    let landuse_ids = ids_of(layers.get("landuse"));

    if let Some(buildings) = layers.get_mut("buildings") {
        for feature in buildings.iter_mut() {
            let key = (
                feature.properties.num_or("id", 0.0) as i64,
                feature.properties.str_or("type", "").to_string(),
            );

            if poi_ids.contains(&key) || landuse_ids.contains(&key) {
                let housename = feature
                    .properties
                    .get("tags")
                    .and_then(Value::as_tags)
                    .and_then(|t| t.get("addr:housename"))
                    .cloned()
                    .unwrap_or_default();

                if housename.is_empty() {
                    feature.properties.remove("name");
                } else {
                    feature.properties.insert("name", housename);
                }
            }
        }
    }

    if let Some(landuse) = layers.get_mut("landuse") {
        for feature in landuse.iter_mut() {
            let key = (
                feature.properties.num_or("id", 0.0) as i64,
                feature.properties.str_or("type", "").to_string(),
            );

            if poi_ids.contains(&key) {
                feature.properties.remove("name");
            }
        }
    }
}

/// Keep only features whose numeric properties meet per-zoom minima.
pub struct NumericMinFilter {
    layer: String,
    any_mode: bool,
    filters: HashMap<i64, Vec<(String, f64)>>,
}

impl NumericMinFilter {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        let layer = params.require_str("source_layer")?;
        let any_mode = params.opt_str("mode") == Some("any");

        let mut filters = HashMap::new();
        if let Some(map) = params.mapping("filters") {
            for (zoom, minima) in map {
                let zoom = zoom.as_i64().ok_or_else(|| {
                    CompileError::msg("numeric_min_filter: filter key must be integer zoom")
                })?;

                let minima = minima.as_mapping().ok_or_else(|| {
                    CompileError::msg("numeric_min_filter: filters must be mappings")
                })?;

                let mut entry = Vec::with_capacity(minima.len());
                for (prop, min) in minima {
                    let (Some(prop), Some(min)) = (prop.as_str(), min.as_f64()) else {
                        return Err(CompileError::msg(
                            "numeric_min_filter: filter property not a number",
                        ));
                    };
                    entry.push((prop.to_string(), min));
                }
                filters.insert(zoom, entry);
            }
        }

        Ok(NumericMinFilter { layer, any_mode, filters })
    }
}

impl PostProcess for NumericMinFilter {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        let Some(minima) = self.filters.get(&(ctx.zoom as i64)) else {
            return; // no filtering for this zoom level
        };
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        layer.retain(|feature| {
            let mut checks = minima
                .iter()
                // a missing property passes its check
                .map(|(prop, min)| feature.properties.num_or(prop, *min) >= *min);
            if self.any_mode {
                checks.any(|b| b)
            } else {
                checks.all(|b| b)
            }
        });
    }
}

/// Drop features matching an inline condition from `start_zoom` on.
pub struct DropFeaturesWhere {
    layer: String,
    start_zoom: f64,
    condition: Condition,
}

impl DropFeaturesWhere {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(DropFeaturesWhere {
            layer: params.require_str("source_layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            condition: params.require_condition("where")?,
        })
    }
}

impl PostProcess for DropFeaturesWhere {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom {
            return;
        }
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        layer.retain(|feature| {
            let mut fctx = Context::from_properties(&feature.properties);
            fctx.geometry = Some(Arc::clone(&feature.geometry));
            !self.condition.eval(&mut fctx)
        });
    }
}

/// Delete every name-variant property from a layer's features between
/// `start_zoom` and `end_zoom`.
pub struct DropNames {
    layer: String,
    start_zoom: f64,
    end_zoom: f64,
}

impl DropNames {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(DropNames {
            layer: params.require_str("source_layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(50.0),
        })
    }
}

impl PostProcess for DropNames {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom || ctx.zoom > self.end_zoom {
            return;
        }
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        for feature in layer.iter_mut() {
            feature.properties.retain(|key| !key_is_name(key));
        }
    }
}

/// If a feature's name ends with a declared parenthetical like `(closed)`,
/// rewrite its kind, raise its min zoom and possibly drop it.
pub struct UpdateParentheticalProperties {
    layer: String,
    target_min_zoom: f64,
    drop_below_zoom: f64,
    values: Vec<String>,
    parenthesized: Vec<String>,
}

impl UpdateParentheticalProperties {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        if params.get("start_zoom").is_some() || params.get("end_zoom").is_some() {
            return Err(CompileError::msg(
                "update_parenthetical_properties: start_zoom/end_zoom not supported",
            ));
        }

        let values = params.require_strings("values")?;
        let parenthesized = values.iter().map(|v| format!("({v})")).collect();

        Ok(UpdateParentheticalProperties {
            layer: params.require_str("source_layer")?,
            target_min_zoom: params.opt_zoom("target_min_zoom")?.unwrap_or(0.0),
            drop_below_zoom: params.opt_zoom("drop_below_zoom")?.ok_or_else(|| {
                CompileError::msg("update_parenthetical_properties: drop_below_zoom is required")
            })?,
            values,
            parenthesized,
        })
    }
}

impl PostProcess for UpdateParentheticalProperties {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        layer.retain_mut(|feature| {
            let mut hits: Vec<usize> = Vec::new();
            for (_, v) in feature.properties.iter() {
                if let Value::Str(s) = v {
                    for (i, suffix) in self.parenthesized.iter().enumerate() {
                        if s.ends_with(suffix) {
                            hits.push(i);
                        }
                    }
                }
            }

            let mut keep = true;
            for i in hits {
                feature.properties.insert("kind", self.values[i].clone());
                feature.properties.insert("min_zoom", self.target_min_zoom);
                if ctx.zoom < self.drop_below_zoom {
                    keep = false;
                }
            }
            keep
        });
    }
}

/// Drop later point features that duplicate an earlier one within a pixel
/// radius, keyed on a tuple of string properties.
pub struct RemoveDuplicateFeatures {
    layers: Vec<String>,
    keys: Vec<String>,
    geometry_types: Vec<String>,
    end_zoom: f64,
    min_distance: f64,
}

impl RemoveDuplicateFeatures {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        let mut layers = Vec::new();
        if let Some(layer) = params.opt_str("source_layer") {
            layers.push(layer.to_string());
        }
        if let Some(more) = params.opt_strings("source_layers")? {
            if !layers.is_empty() {
                return Err(CompileError::msg(
                    "remove_duplicate_features: must define source_layer XOR source_layers",
                ));
            }
            layers = more;
        }
        if layers.is_empty() {
            return Err(CompileError::msg(
                "remove_duplicate_features: must define source_layer XOR source_layers",
            ));
        }

        Ok(RemoveDuplicateFeatures {
            layers,
            keys: params.require_strings("property_keys")?,
            geometry_types: params.require_strings("geometry_types")?,
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(0.0),
            min_distance: params.require_f64("min_distance")?,
        })
    }

    /// Convert the pixel radius to meters: the width of one tile at
    /// `zoom+8` (256px tiles make a pixel at `zoom` a tile at `zoom+8`)
    /// measured at the bound's southern edge.
    fn distance_meters(&self, ctx: &PostContext) -> f64 {
        let tile_span = 360.0 / 2f64.powf(ctx.zoom + 8.0);
        let origin = Point::new(ctx.bound.min().x, ctx.bound.min().y);
        let shifted = Point::new(
            ctx.bound.min().x + self.min_distance * tile_span,
            ctx.bound.min().y,
        );
        origin.haversine_distance(&shifted)
    }
}

struct Deduplicator {
    distance: f64,
    keys: Vec<String>,
    found: HashMap<String, Vec<Point<f64>>>,
}

impl Deduplicator {
    fn keep(&mut self, feature: &Feature) -> bool {
        let mut parts = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let s = feature.properties.str_or(key, "");
            if s.is_empty() {
                // a missing key means we can't cluster it; keep it
                return true;
            }
            parts.push(s);
        }

        let Geometry::Point(point) = feature.geometry.as_ref() else {
            return true;
        };

        let key = parts.join("-!-");
        let entry = self.found.entry(key).or_default();
        for other in entry.iter() {
            if point.haversine_distance(other) < self.distance {
                return false;
            }
        }

        entry.push(*point);
        true
    }
}

impl PostProcess for RemoveDuplicateFeatures {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if self.end_zoom != 0.0 && ctx.zoom > self.end_zoom {
            return;
        }

        let mut deduper = Deduplicator {
            distance: self.distance_meters(ctx),
            keys: self.keys.clone(),
            found: HashMap::new(),
        };

        for name in &self.layers {
            let Some(layer) = layers.get_mut(name) else {
                continue;
            };

            layer.retain(|feature| {
                let gt = crate::geometry::geometry_type(&feature.geometry);
                if !self.geometry_types.iter().any(|t| t == gt) {
                    return true;
                }
                deduper.keep(feature)
            });
        }
    }
}

/// For qualifying polygon features, append a point feature at the interior
/// point carrying the same properties plus `label_placement=true`.
pub struct HandleLabelPlacement {
    layers: Vec<String>,
    clip_factors: HashMap<String, f64>,
    start_zoom: f64,
    condition: Option<Condition>,
}

impl HandleLabelPlacement {
    pub fn compile(ctx: &CompileContext, params: &Params) -> Result<Self, CompileError> {
        Ok(HandleLabelPlacement {
            layers: params.opt_strings("layers")?.unwrap_or_default(),
            clip_factors: ctx.clip_factors.clone(),
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            condition: params.opt_condition("label_where")?,
        })
    }
}

impl PostProcess for HandleLabelPlacement {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom {
            return;
        }

        for name in &self.layers {
            let factor = self.clip_factors.get(name).copied().unwrap_or(1.0);
            let padded = pad_bound_by_factor(&ctx.bound, factor);
            let Some(layer) = layers.get_mut(name) else {
                continue;
            };

            let mut labels = Vec::new();
            for feature in layer.iter_mut() {
                if let Some(cond) = &self.condition {
                    let mut fctx = Context::from_properties(&feature.properties);
                    fctx.geometry = Some(Arc::clone(&feature.geometry));
                    if !cond.eval(&mut fctx) {
                        continue;
                    }
                }

                if has_open_outer_ring(&feature.geometry) {
                    // A centroid of an open ring is meaningless; crop and
                    // wrap around the tile bound first.
                    match clip_to_bound(&ctx.bound, &feature.geometry) {
                        Some(clipped) => feature.geometry = Arc::new(clipped),
                        None => continue,
                    }
                }

                let Some(centroid) = representative_point(&feature.geometry) else {
                    continue;
                };
                if !bound_contains(&padded, &centroid) {
                    continue;
                }

                let mut props = feature.properties.clone();
                props.insert("label_placement", true);
                labels.push(Feature::new(Arc::new(Geometry::Point(centroid)), props));
            }

            layer.extend(labels);
        }
    }
}

/// Copy a property from matching features (by id) in another layer onto
/// features that don't have it yet, e.g. POI kinds into building
/// kind_details.
pub struct BackfillFromOtherLayer {
    src_layer: String,
    src_key: String,
    dst_layer: String,
    dst_key: String,
}

impl BackfillFromOtherLayer {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(BackfillFromOtherLayer {
            src_layer: params.require_str("other_layer")?,
            src_key: params.require_str("other_key")?,
            dst_layer: params.require_str("layer")?,
            dst_key: params.require_str("layer_key")?,
        })
    }
}

impl PostProcess for BackfillFromOtherLayer {
    fn eval(&self, _ctx: &PostContext, layers: &mut Layers) {
        let mut values: HashMap<i64, Value> = HashMap::new();
        for feature in layers.get(&self.src_layer).into_iter().flatten() {
            let id = feature.properties.num_or("id", 0.0) as i64;
            if id == 0 {
                continue;
            }
            if let Some(v) = feature.properties.get(&self.src_key) {
                values.insert(id, v.clone());
            }
        }

        let Some(layer) = layers.get_mut(&self.dst_layer) else {
            return;
        };
        for feature in layer.iter_mut() {
            if feature.properties.contains_key(&self.dst_key) {
                continue;
            }

            let id = feature.properties.num_or("id", 0.0) as i64;
            if id == 0 {
                continue;
            }

            if let Some(v) = values.get(&id) {
                feature.properties.insert(self.dst_key.clone(), v.clone());
            }
        }
    }
}

/// Evaluate a compiled CSV matcher over a layer.
pub struct CsvMatchProperties {
    layer: String,
    matcher: Matcher,
}

impl CsvMatchProperties {
    pub fn compile(
        ctx: &CompileContext,
        cfg: &PostProcessConfig,
        params: &Params,
    ) -> Result<Self, CompileError> {
        let resource = cfg.resources.matcher.as_ref().ok_or_else(|| {
            CompileError::msg("csv_match_properties: matcher resource is required")
        })?;
        let data = ctx.assets.resolve(&resource.path).ok_or_else(|| {
            CompileError::msg(format!("asset not found: {}", resource.path))
        })?;

        Ok(CsvMatchProperties {
            layer: params.require_str("source_layer")?,
            matcher: Matcher::load(&data)?,
        })
    }
}

impl PostProcess for CsvMatchProperties {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        let mctx = MatchContext { zoom: ctx.zoom };
        for feature in layer.iter_mut() {
            self.matcher.eval(&mctx, feature);
        }
    }
}

/// Assign a collision rank to every feature that might carry a label.
pub struct AddCollisionRank {
    ranker: Ranker,
}

const SHIELD_TEXT_KEYS: &[&str] = &[
    "ref",
    "shield_text",
    "bicycle_shield_text",
    "bus_shield_text",
    "walking_shield_text",
];

impl AddCollisionRank {
    pub fn compile(
        ctx: &CompileContext,
        cfg: &PostProcessConfig,
    ) -> Result<Self, CompileError> {
        let resource = cfg.resources.ranker.as_ref().ok_or_else(|| {
            CompileError::msg("add_collision_rank: ranker resource is required")
        })?;
        let data = ctx.assets.resolve(&resource.path).ok_or_else(|| {
            CompileError::msg(format!("asset not found: {}", resource.path))
        })?;

        Ok(AddCollisionRank { ranker: Ranker::load(&data)? })
    }

    fn applies(layer_name: &str, props: &Properties) -> bool {
        layer_name == "pois"
            || has_name(props)
            || SHIELD_TEXT_KEYS.iter().any(|k| props.contains_key(k))
    }
}

impl PostProcess for AddCollisionRank {
    fn eval(&self, _ctx: &PostContext, layers: &mut Layers) {
        for (name, layer) in layers.iter_mut() {
            for feature in layer.iter_mut() {
                if Self::applies(name, &feature.properties) {
                    let rank = self.ranker.rank(name, &feature.properties);
                    feature.properties.insert("collision_rank", rank as f64);
                }
            }
        }
    }
}

/// Run the route network merge/extract/choose steps over a layer.
pub struct RoadNetworks {
    layer: String,
}

impl RoadNetworks {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(RoadNetworks { layer: params.require_str("source_layer")? })
    }
}

impl PostProcess for RoadNetworks {
    fn eval(&self, _ctx: &PostContext, layers: &mut Layers) {
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        for feature in layer.iter_mut() {
            networks::merge_networks_from_tags(feature);
            networks::extract_network_information(feature);
            networks::choose_most_important_network(feature);
        }
    }
}

/// Clip every feature's geometry: open outer rings to the exact tile
/// bound, everything else to a padded bound so neighbour-tile seams keep
/// their geometry. Features clipped to nothing are dropped.
pub struct ClipAndWrap;

impl PostProcess for ClipAndWrap {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        clip_and_wrap_geometry(&ctx.bound, layers);
    }
}

pub fn clip_and_wrap_geometry(bound: &Bound, layers: &mut Layers) {
    let padded = pad_bound_by_factor(bound, 2.0);

    for layer in layers.values_mut() {
        layer.retain_mut(|feature| {
            let window = if has_open_outer_ring(&feature.geometry) {
                bound
            } else {
                &padded
            };

            match clip_to_bound(window, &feature.geometry) {
                Some(clipped) => {
                    feature.geometry = Arc::new(clipped);
                    true
                }
                None => false,
            }
        });
    }
}
