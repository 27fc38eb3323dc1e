//! Geometry construction from the element graph.
//!
//! This is a deliberately small topology: tagged nodes become points, ways
//! become lines or polygons, and multipolygon relations are assembled from
//! their closed member ways. Invalid polygons are kept rather than
//! dropped, and a multipolygon whose outer ring is missing gets the padded
//! tile bound as its outer, so interior details near the tile edge
//! survive. The seam is a plain function over the graph; callers with a
//! richer topology can build `RawFeature`s themselves.

use std::collections::HashMap;
use std::sync::Arc;

use geo_types::{Geometry, LineString, Point, Polygon};

use super::{ElementType, FeatureId, Graph, Node, Relation, Way};
use crate::geometry::{pad_bound, Bound};
use crate::value::TagMap;

/// A geometry-bearing input feature, before any layer evaluation.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub id: FeatureId,
    pub geometry: Arc<Geometry<f64>>,
    pub tags: Arc<TagMap>,
}

/// Build the candidate features for one tile: ways first, then relations,
/// then tagged nodes.
pub fn build_features(graph: &Graph, bound: &Bound) -> Vec<RawFeature> {
    let nodes: HashMap<i64, &Node> = graph.nodes.iter().map(|n| (n.id, n)).collect();

    let mut features = Vec::new();

    for way in &graph.ways {
        if way.tags.is_empty() {
            continue;
        }

        if let Some(geometry) = way_geometry(way, &nodes) {
            features.push(RawFeature {
                id: FeatureId::way(way.id),
                geometry: Arc::new(geometry),
                tags: Arc::clone(&way.tags),
            });
        }
    }

    for relation in &graph.relations {
        if relation.tags.is_empty() {
            continue;
        }

        let kind = relation.tags.get("type").map(String::as_str).unwrap_or("");
        if kind != "multipolygon" && kind != "boundary" {
            continue;
        }

        if let Some(geometry) = multipolygon_geometry(relation, graph, &nodes, bound) {
            features.push(RawFeature {
                id: FeatureId::relation(relation.id),
                geometry: Arc::new(geometry),
                tags: Arc::clone(&relation.tags),
            });
        }
    }

    for node in &graph.nodes {
        if node.tags.is_empty() {
            continue;
        }

        features.push(RawFeature {
            id: FeatureId::node(node.id),
            geometry: Arc::new(Geometry::Point(Point::new(node.lon, node.lat))),
            tags: Arc::clone(&node.tags),
        });
    }

    features
}

fn way_line(way: &Way, nodes: &HashMap<i64, &Node>) -> Option<LineString<f64>> {
    let coords: Vec<(f64, f64)> = way
        .nodes
        .iter()
        .filter_map(|id| nodes.get(id).map(|n| (n.lon, n.lat)))
        .collect();

    if coords.len() < 2 {
        return None;
    }

    Some(LineString::from(coords))
}

fn way_geometry(way: &Way, nodes: &HashMap<i64, &Node>) -> Option<Geometry<f64>> {
    let line = way_line(way, nodes)?;

    if line.is_closed() && is_polygonal(&way.tags) {
        return Some(Geometry::Polygon(Polygon::new(line, vec![])));
    }

    Some(Geometry::LineString(line))
}

/// Whether a closed way is an area. Anything closed is, unless it says
/// otherwise or is a linear feature (highway, barrier) without an
/// explicit area tag.
fn is_polygonal(tags: &TagMap) -> bool {
    let area = tags.get("area").map(String::as_str).unwrap_or("");
    if area == "no" {
        return false;
    }

    if (tags.contains_key("highway") || tags.contains_key("barrier")) && area != "yes" {
        return false;
    }

    true
}

// TODO: stitch partial outer ways into rings; only closed member ways
// form rings today.
fn multipolygon_geometry(
    relation: &Relation,
    graph: &Graph,
    nodes: &HashMap<i64, &Node>,
    bound: &Bound,
) -> Option<Geometry<f64>> {
    let ways: HashMap<i64, &Way> = graph.ways.iter().map(|w| (w.id, w)).collect();

    let mut outers: Vec<LineString<f64>> = Vec::new();
    let mut inners: Vec<LineString<f64>> = Vec::new();

    for member in &relation.members {
        if member.element != ElementType::Way {
            continue;
        }
        let Some(way) = ways.get(&member.id) else {
            continue;
        };
        let Some(line) = way_line(way, nodes) else {
            continue;
        };
        if !line.is_closed() {
            continue;
        }

        match member.role.as_str() {
            "inner" => inners.push(line),
            _ => outers.push(line),
        }
    }

    if outers.is_empty() {
        if inners.is_empty() {
            return None;
        }

        // Only the inners intersect this tile: stand in a padded tile
        // bound as the outer ring so the holes still render.
        let padded = pad_bound(bound, bound.width());
        outers.push(padded.to_polygon().exterior().clone());
    }

    if outers.len() == 1 {
        let outer = outers.pop().expect("checked non-empty");
        return Some(Geometry::Polygon(Polygon::new(outer, inners)));
    }

    // Inner assignment by containment is not needed for the shapes this
    // topology produces; attach them to the first outer.
    let mut polygons: Vec<Polygon<f64>> = outers
        .into_iter()
        .map(|o| Polygon::new(o, vec![]))
        .collect();
    if let Some(first) = polygons.first_mut() {
        for inner in inners {
            first.interiors_push(inner);
        }
    }

    Some(Geometry::MultiPolygon(polygons.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::world_bound;
    use crate::osm::{tags, Member};

    fn square_way(id: i64, way_tags: Arc<TagMap>) -> (Vec<Node>, Way) {
        let nodes = vec![
            Node { id: 1, lat: 0.0, lon: 0.0, tags: tags(&[]) },
            Node { id: 2, lat: 0.0, lon: 0.001, tags: tags(&[]) },
            Node { id: 3, lat: 0.001, lon: 0.001, tags: tags(&[]) },
            Node { id: 4, lat: 0.001, lon: 0.0, tags: tags(&[]) },
        ];
        let way = Way { id, nodes: vec![1, 2, 3, 4, 1], tags: way_tags };
        (nodes, way)
    }

    #[test]
    fn closed_tagged_way_is_polygon() {
        let (nodes, way) = square_way(10, tags(&[("building", "yes")]));
        let graph = Graph { nodes, ways: vec![way], relations: vec![] };

        let features = build_features(&graph, &world_bound());
        assert_eq!(features.len(), 1);
        assert!(matches!(features[0].geometry.as_ref(), Geometry::Polygon(_)));
        assert_eq!(features[0].id, FeatureId::way(10));
    }

    #[test]
    fn closed_highway_stays_line() {
        let (nodes, way) = square_way(10, tags(&[("highway", "residential")]));
        let graph = Graph { nodes, ways: vec![way], relations: vec![] };

        let features = build_features(&graph, &world_bound());
        assert!(matches!(
            features[0].geometry.as_ref(),
            Geometry::LineString(_)
        ));

        let (nodes, way) = square_way(11, tags(&[("highway", "pedestrian"), ("area", "yes")]));
        let graph = Graph { nodes, ways: vec![way], relations: vec![] };
        let features = build_features(&graph, &world_bound());
        assert!(matches!(features[0].geometry.as_ref(), Geometry::Polygon(_)));
    }

    #[test]
    fn untagged_elements_are_skipped() {
        let (nodes, way) = square_way(10, tags(&[]));
        let graph = Graph { nodes, ways: vec![way], relations: vec![] };
        assert!(build_features(&graph, &world_bound()).is_empty());
    }

    #[test]
    fn tagged_node_is_point() {
        let graph = Graph {
            nodes: vec![Node {
                id: 1,
                lat: 2.0,
                lon: 3.0,
                tags: tags(&[("amenity", "restaurant")]),
            }],
            ways: vec![],
            relations: vec![],
        };

        let features = build_features(&graph, &world_bound());
        assert_eq!(features.len(), 1);
        match features[0].geometry.as_ref() {
            Geometry::Point(p) => assert_eq!((p.x(), p.y()), (3.0, 2.0)),
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn multipolygon_with_inner() {
        let mut nodes = vec![
            Node { id: 1, lat: 0.0, lon: 0.0, tags: tags(&[]) },
            Node { id: 2, lat: 0.0, lon: 0.01, tags: tags(&[]) },
            Node { id: 3, lat: 0.01, lon: 0.01, tags: tags(&[]) },
            Node { id: 4, lat: 0.01, lon: 0.0, tags: tags(&[]) },
        ];
        nodes.extend(vec![
            Node { id: 5, lat: 0.004, lon: 0.004, tags: tags(&[]) },
            Node { id: 6, lat: 0.004, lon: 0.006, tags: tags(&[]) },
            Node { id: 7, lat: 0.006, lon: 0.006, tags: tags(&[]) },
            Node { id: 8, lat: 0.006, lon: 0.004, tags: tags(&[]) },
        ]);

        let graph = Graph {
            nodes,
            ways: vec![
                Way { id: 20, nodes: vec![1, 2, 3, 4, 1], tags: tags(&[]) },
                Way { id: 21, nodes: vec![5, 6, 7, 8, 5], tags: tags(&[]) },
            ],
            relations: vec![Relation {
                id: 30,
                members: vec![
                    Member { element: ElementType::Way, id: 20, role: "outer".into() },
                    Member { element: ElementType::Way, id: 21, role: "inner".into() },
                ],
                tags: tags(&[("type", "multipolygon"), ("natural", "water")]),
            }],
        };

        let features = build_features(&graph, &world_bound());
        assert_eq!(features.len(), 1);
        match features[0].geometry.as_ref() {
            Geometry::Polygon(p) => assert_eq!(p.interiors().len(), 1),
            other => panic!("expected polygon, got {other:?}"),
        }
        assert_eq!(features[0].id, FeatureId::relation(30));
    }

    #[test]
    fn missing_outer_uses_padded_bound() {
        let nodes = vec![
            Node { id: 5, lat: 0.004, lon: 0.004, tags: tags(&[]) },
            Node { id: 6, lat: 0.004, lon: 0.006, tags: tags(&[]) },
            Node { id: 7, lat: 0.006, lon: 0.006, tags: tags(&[]) },
            Node { id: 8, lat: 0.006, lon: 0.004, tags: tags(&[]) },
        ];

        let graph = Graph {
            nodes,
            ways: vec![Way { id: 21, nodes: vec![5, 6, 7, 8, 5], tags: tags(&[]) }],
            relations: vec![Relation {
                id: 30,
                members: vec![Member {
                    element: ElementType::Way,
                    id: 21,
                    role: "inner".into(),
                }],
                tags: tags(&[("type", "multipolygon"), ("natural", "water")]),
            }],
        };

        let bound = geo_types::Rect::new(
            geo_types::Coord { x: 0.0, y: 0.0 },
            geo_types::Coord { x: 0.01, y: 0.01 },
        );
        let features = build_features(&graph, &bound);
        assert_eq!(features.len(), 1);
        match features[0].geometry.as_ref() {
            Geometry::Polygon(p) => {
                assert_eq!(p.interiors().len(), 1);
                // the outer is wider than the bound itself
                assert!(p.exterior().0.iter().any(|c| c.x < 0.0));
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }
}
