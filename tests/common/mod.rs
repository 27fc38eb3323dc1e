//! Shared builders for the end-to-end tests.

#![allow(dead_code)]

use stratum::{tags, Graph, Node, Properties, Value, Way};

/// A closed square way from (0, 0) to (0.001, 0.001), roughly 111m on a
/// side at the equator, with the given tags.
pub fn square_way_graph(id: i64, way_tags: &[(&str, &str)]) -> Graph {
    let corner = |node_id: i64, lat: f64, lon: f64| Node {
        id: node_id,
        lat,
        lon,
        tags: tags(&[]),
    };

    Graph {
        nodes: vec![
            corner(1, 0.0, 0.0),
            corner(2, 0.0, 0.001),
            corner(3, 0.001, 0.001),
            corner(4, 0.001, 0.0),
        ],
        ways: vec![Way {
            id,
            nodes: vec![1, 2, 3, 4, 1],
            tags: tags(way_tags),
        }],
        relations: vec![],
    }
}

/// Assert that every expected (key, value) pair is present and equal.
#[track_caller]
pub fn assert_props(actual: &Properties, expected: &[(&str, Value)]) {
    for (key, want) in expected {
        match actual.get(key) {
            None => panic!("'{key}' is not in actual: {actual:?}"),
            Some(got) if got != want => {
                panic!("'{key}' is not equal: {got:?} != {want:?}\nactual: {actual:?}")
            }
            Some(_) => {}
        }
    }
}
