//! Geometry helpers shared by the evaluation context, tile driver and
//! post-processors. Heavy lifting is delegated to the `geo` crate.

use geo::{BooleanOps, Centroid, MapCoords};
use geo_types::{Coord, Geometry, MultiLineString, MultiPolygon, Point, Polygon, Rect};

/// A geographic bound in degrees: min = (west, south), max = (east, north).
pub type Bound = Rect<f64>;

/// The whole-world bound used by single-element evaluation.
pub fn world_bound() -> Bound {
    Rect::new(Coord { x: -180.0, y: -90.0 }, Coord { x: 180.0, y: 90.0 })
}

/// GeoJSON-style type name for a geometry.
pub fn geometry_type(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

pub fn bound_contains(bound: &Bound, p: &Point<f64>) -> bool {
    let min = bound.min();
    let max = bound.max();
    p.x() >= min.x && p.x() <= max.x && p.y() >= min.y && p.y() <= max.y
}

/// Pad a bound by a clip factor: 1.0 is the bound itself, 3.0 is a 3x3
/// tile area centered on it.
pub fn pad_bound_by_factor(bound: &Bound, factor: f64) -> Bound {
    if factor == 0.0 || factor == 1.0 {
        return *bound;
    }

    pad_bound(bound, bound.height() * (factor - 1.0) / 2.0)
}

/// Pad a bound by a fixed amount of degrees on every side.
pub fn pad_bound(bound: &Bound, padding: f64) -> Bound {
    let min = bound.min();
    let max = bound.max();
    Rect::new(
        Coord { x: min.x - padding, y: min.y - padding },
        Coord { x: max.x + padding, y: max.y + padding },
    )
}

const EARTH_RADIUS_M: f64 = 6_378_137.0;

fn mercator(c: Coord<f64>) -> Coord<f64> {
    use std::f64::consts::PI;
    let lat = c.y.clamp(-85.051_128, 85.051_128);
    Coord {
        x: EARTH_RADIUS_M * c.x.to_radians(),
        y: EARTH_RADIUS_M * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln(),
    }
}

/// Project a geographic geometry to spherical Mercator for planar
/// measurement.
pub fn to_planar(g: &Geometry<f64>) -> Geometry<f64> {
    g.map_coords(mercator)
}

/// A polygon whose outer ring does not close. These come from tainted
/// multipolygon source data and must be clipped to the exact tile bound
/// before any centroid or output use.
pub fn has_open_outer_ring(g: &Geometry<f64>) -> bool {
    match g {
        Geometry::Polygon(p) => !p.exterior().is_closed(),
        Geometry::MultiPolygon(mp) => mp.iter().any(|p| !p.exterior().is_closed()),
        _ => false,
    }
}

/// The representative interior point of a geometry, used for labels.
pub fn representative_point(g: &Geometry<f64>) -> Option<Point<f64>> {
    g.centroid()
}

/// Clip a geometry to a bound. Returns `None` when nothing remains.
pub fn clip_to_bound(bound: &Bound, g: &Geometry<f64>) -> Option<Geometry<f64>> {
    let window = bound.to_polygon();
    match g {
        Geometry::Point(p) => bound_contains(bound, p).then_some(Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let kept: Vec<Point<f64>> = mp
                .iter()
                .filter(|p| bound_contains(bound, p))
                .copied()
                .collect();
            (!kept.is_empty()).then_some(Geometry::MultiPoint(kept.into()))
        }
        Geometry::LineString(ls) => {
            let clipped = window.clip(&MultiLineString::new(vec![ls.clone()]), false);
            line_result(clipped)
        }
        Geometry::MultiLineString(mls) => line_result(window.clip(mls, false)),
        Geometry::Polygon(p) => polygon_result(window.intersection(&closed(p))),
        Geometry::MultiPolygon(mp) => {
            let closed_parts: Vec<Polygon<f64>> = mp.iter().map(closed).collect();
            polygon_result(
                MultiPolygon::new(vec![window]).intersection(&MultiPolygon::new(closed_parts)),
            )
        }
        other => Some(other.clone()),
    }
}

fn closed(p: &Polygon<f64>) -> Polygon<f64> {
    // Polygon::new closes all rings.
    Polygon::new(p.exterior().clone(), p.interiors().to_vec())
}

fn line_result(mls: MultiLineString<f64>) -> Option<Geometry<f64>> {
    let mut lines: Vec<_> = mls.into_iter().filter(|ls| ls.0.len() >= 2).collect();
    match lines.len() {
        0 => None,
        1 => Some(Geometry::LineString(lines.pop().unwrap())),
        _ => Some(Geometry::MultiLineString(MultiLineString::new(lines))),
    }
}

fn polygon_result(mp: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let mut polys: Vec<_> = mp
        .into_iter()
        .filter(|p| p.exterior().0.len() >= 4)
        .collect();
    match polys.len() {
        0 => None,
        1 => Some(Geometry::Polygon(polys.pop().unwrap())),
        _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polys))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::LineString;

    fn unit_bound() -> Bound {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 })
    }

    #[test]
    fn pad_by_factor() {
        let b = unit_bound();
        let padded = pad_bound_by_factor(&b, 3.0);
        assert_eq!(padded.min().x, -1.0);
        assert_eq!(padded.max().y, 2.0);
        // factor 1.0 is the identity
        assert_eq!(pad_bound_by_factor(&b, 1.0), b);
    }

    #[test]
    fn clip_point() {
        let b = unit_bound();
        assert!(clip_to_bound(&b, &Geometry::Point(Point::new(0.5, 0.5))).is_some());
        assert!(clip_to_bound(&b, &Geometry::Point(Point::new(2.0, 0.5))).is_none());
    }

    #[test]
    fn clip_line_crossing() {
        let b = unit_bound();
        let line = Geometry::LineString(LineString::from(vec![(-1.0, 0.5), (2.0, 0.5)]));
        let clipped = clip_to_bound(&b, &line).unwrap();
        match clipped {
            Geometry::LineString(ls) => {
                assert!(ls.0.iter().all(|c| c.x >= 0.0 && c.x <= 1.0));
            }
            other => panic!("expected LineString, got {other:?}"),
        }
    }

    #[test]
    fn clip_polygon_outside() {
        let b = unit_bound();
        let poly = Geometry::Polygon(Polygon::new(
            LineString::from(vec![(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 5.0)]),
            vec![],
        ));
        assert!(clip_to_bound(&b, &poly).is_none());
    }

    #[test]
    fn mercator_area_of_small_square() {
        use geo::Area;
        // 0.001 x 0.001 degrees at the equator is roughly 111m x 111m.
        let poly = Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (0.001, 0.0),
                (0.001, 0.001),
                (0.0, 0.001),
                (0.0, 0.0),
            ]),
            vec![],
        ));
        let area = to_planar(&poly).unsigned_area();
        assert!(area > 11_000.0 && area < 14_000.0, "area = {area}");
    }
}
