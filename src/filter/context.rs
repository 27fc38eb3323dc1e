//! Per-feature evaluation context with lazily computed scalars.

use std::sync::{Arc, LazyLock};

use geo::{Area, EuclideanLength};
use geo_types::Geometry;

use crate::geometry::to_planar;
use crate::osm::{ElementType, FeatureId, Membership};
use crate::util;
use crate::value::{Properties, TagMap, Value};

static EMPTY_TAGS: LazyLock<Arc<TagMap>> = LazyLock::new(|| Arc::new(TagMap::new()));
static EMPTY_MEMBERSHIP: LazyLock<Arc<Membership>> =
    LazyLock::new(|| Arc::new(Membership::default()));

const UNSET: f64 = -1.0;

/// The evaluation context: one feature's tags, geometry and id, the tile's
/// membership indexes, and caches for the derived scalars rules keep asking
/// for. One context is reused across all features of a tile; `bind` resets
/// the caches.
///
/// `tags` is the map conditions currently read. It normally aliases
/// `osm_tags`; during post-processing it holds the feature's computed
/// string properties instead, and the `osm_tags` condition temporarily
/// swaps the original map back in.
pub struct Context {
    pub debug: bool,
    pub feature_id: Option<FeatureId>,
    pub geometry: Option<Arc<Geometry<f64>>>,
    pub tags: Arc<TagMap>,
    pub osm_tags: Arc<TagMap>,
    pub membership: Arc<Membership>,

    area: f64,
    length: f64,
    height: f64,
    min_zoom: f64,
}

impl Context {
    pub fn new() -> Self {
        Context {
            debug: false,
            feature_id: None,
            geometry: None,
            tags: Arc::clone(&EMPTY_TAGS),
            osm_tags: Arc::clone(&EMPTY_TAGS),
            membership: Arc::clone(&EMPTY_MEMBERSHIP),
            area: UNSET,
            length: UNSET,
            height: UNSET,
            min_zoom: UNSET,
        }
    }

    /// Point the context at a new feature, resetting every cached scalar.
    pub fn bind(
        &mut self,
        feature_id: FeatureId,
        geometry: Arc<Geometry<f64>>,
        tags: Arc<TagMap>,
    ) {
        self.feature_id = Some(feature_id);
        self.geometry = Some(geometry);
        self.osm_tags = Arc::clone(&tags);
        self.tags = tags;
        self.area = UNSET;
        self.length = UNSET;
        self.height = UNSET;
        self.min_zoom = UNSET;
    }

    /// A context over a feature's computed properties, as used by
    /// post-processors: string properties become the current tag map and
    /// the retained `tags` property becomes the OSM tag map.
    pub fn from_properties(props: &Properties) -> Self {
        let tags: TagMap = props
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let osm_tags = props
            .get("tags")
            .and_then(Value::as_tags)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&EMPTY_TAGS));

        let feature_id = match (props.str_or("type", ""), props.num_or("id", 0.0)) {
            ("node", id) if id != 0.0 => Some(FeatureId::node(id as i64)),
            ("way", id) if id != 0.0 => Some(FeatureId::way(id as i64)),
            ("relation", id) if id != 0.0 => Some(FeatureId::relation(id as i64)),
            _ => None,
        };

        Context {
            debug: false,
            feature_id,
            geometry: None,
            tags: Arc::new(tags),
            osm_tags,
            membership: Arc::clone(&EMPTY_MEMBERSHIP),
            area: UNSET,
            length: UNSET,
            height: UNSET,
            min_zoom: UNSET,
        }
    }

    /// Tag value or `""` when absent.
    pub fn tag<'a>(&'a self, key: &str) -> &'a str {
        self.tags.get(key).map(String::as_str).unwrap_or("")
    }

    /// Evaluate `f` with the original OSM tags as the current tag map.
    /// The previous map is restored on exit.
    pub fn with_osm_tags<R>(&mut self, f: impl FnOnce(&mut Context) -> R) -> R {
        let prev = std::mem::replace(&mut self.tags, Arc::clone(&self.osm_tags));
        let result = f(self);
        self.tags = prev;
        result
    }

    /// Planar area in square meters, rounded to the nearest integer.
    pub fn area(&mut self) -> f64 {
        if self.area < 0.0 {
            self.compute_length_area();
        }
        self.area
    }

    /// Planar length in meters: line length, polygon outer ring length,
    /// zero otherwise.
    pub fn length(&mut self) -> f64 {
        if self.length < 0.0 {
            self.compute_length_area();
        }
        self.length
    }

    fn compute_length_area(&mut self) {
        let Some(geometry) = self.geometry.as_deref() else {
            self.area = 0.0;
            self.length = 0.0;
            return;
        };

        let projected = to_planar(geometry);
        self.area = (projected.unsigned_area() + 0.5).floor();
        self.length = match &projected {
            Geometry::LineString(ls) => ls.euclidean_length(),
            Geometry::Polygon(p) => p.exterior().euclidean_length(),
            _ => 0.0,
        };
    }

    /// Height in meters derived from the `height` tag, falling back to
    /// `building:levels`, rounded to the nearest integer. When either tag
    /// is present but neither parses, the result is 1e10: we have no idea
    /// what it is and must assume it could be very large.
    pub fn height(&mut self) -> f64 {
        if self.height < 0.0 {
            self.height = (self.raw_height() + 0.5).floor();
        }
        self.height
    }

    fn raw_height(&self) -> f64 {
        let height = self.tag("height");
        if let Some(h) = util::to_f64_meters(height) {
            return h;
        }

        // each level is about 3m, plus 2 overall
        let levels = self.tag("building:levels");
        if let Some(l) = util::to_f64_meters(levels) {
            return l.max(1.0) * 3.0 + 2.0;
        }

        if !height.is_empty() || !levels.is_empty() {
            return 1.0e10;
        }

        0.0
    }

    /// The (possibly fractional) zoom at which this feature's area covers
    /// about one square pixel on a 256px tile, truncated to two decimals.
    /// Tiny areas clamp to 16: by then everything should be visible.
    pub fn min_zoom_from_area(&mut self) -> f64 {
        if self.min_zoom >= 0.0 {
            return self.min_zoom;
        }

        let area = self.area();
        if area < 5.704 {
            return 16.0;
        }

        let z = 17.256 - area.ln() / 4f64.ln();
        self.min_zoom = (z * 100.0).floor() / 100.0;
        self.min_zoom
    }

    /// Tags of the ways this node is a member of; empty for non-nodes.
    pub fn way_memberships(&self) -> &[Arc<TagMap>] {
        let Some(FeatureId { element: ElementType::Node, id }) = self.feature_id else {
            return &[];
        };
        self.membership
            .way
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Tags of the relations referencing this feature.
    pub fn relation_memberships(&self) -> &[Arc<TagMap>] {
        let Some(fid) = self.feature_id else {
            return &[];
        };
        self.membership
            .relation
            .get(&fid)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::tags;
    use geo_types::{LineString, Polygon};

    fn square_polygon() -> Arc<Geometry<f64>> {
        Arc::new(Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (0.001, 0.0),
                (0.001, 0.001),
                (0.0, 0.001),
                (0.0, 0.0),
            ]),
            vec![],
        )))
    }

    #[test]
    fn area_is_cached_and_rounded() {
        let mut ctx = Context::new();
        ctx.bind(FeatureId::way(1), square_polygon(), tags(&[]));
        let a = ctx.area();
        assert_eq!(a, a.floor());
        assert_eq!(ctx.area(), a);
    }

    #[test]
    fn height_from_tag_and_levels() {
        let mut ctx = Context::new();

        ctx.bind(FeatureId::way(1), square_polygon(), tags(&[("height", "10")]));
        assert_eq!(ctx.height(), 10.0);

        ctx.bind(
            FeatureId::way(1),
            square_polygon(),
            tags(&[("building:levels", "7")]),
        );
        assert_eq!(ctx.height(), 23.0);

        ctx.bind(
            FeatureId::way(1),
            square_polygon(),
            tags(&[("height", "not a number")]),
        );
        assert_eq!(ctx.height(), 1.0e10);

        // an unparseable height falls back to the levels
        ctx.bind(
            FeatureId::way(1),
            square_polygon(),
            tags(&[("height", "unclear"), ("building:levels", "3")]),
        );
        assert_eq!(ctx.height(), 11.0);

        ctx.bind(
            FeatureId::way(1),
            square_polygon(),
            tags(&[("building:levels", "several")]),
        );
        assert_eq!(ctx.height(), 1.0e10);

        ctx.bind(FeatureId::way(1), square_polygon(), tags(&[]));
        assert_eq!(ctx.height(), 0.0);
    }

    #[test]
    fn min_zoom_clamps_small_areas() {
        let mut ctx = Context::new();
        ctx.bind(
            FeatureId::node(1),
            Arc::new(Geometry::Point(geo_types::Point::new(0.0, 0.0))),
            tags(&[]),
        );
        assert_eq!(ctx.min_zoom_from_area(), 16.0);
    }

    #[test]
    fn min_zoom_two_decimals() {
        let mut ctx = Context::new();
        ctx.bind(FeatureId::way(1), square_polygon(), tags(&[]));
        let mz = ctx.min_zoom_from_area();
        assert_eq!((mz * 100.0).floor() / 100.0, mz);
        assert!(mz > 10.0 && mz < 11.0, "min_zoom = {mz}");
    }

    #[test]
    fn osm_tag_swap_restores() {
        let mut ctx = Context::new();
        ctx.bind(FeatureId::node(1), square_polygon(), tags(&[("a", "osm")]));
        ctx.tags = tags(&[("a", "props")]);

        assert_eq!(ctx.tag("a"), "props");
        let inner = ctx.with_osm_tags(|ctx| ctx.tag("a").to_string());
        assert_eq!(inner, "osm");
        assert_eq!(ctx.tag("a"), "props");
    }
}
