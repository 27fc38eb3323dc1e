//! Filter matching throughput. The no-match case is the hot path of a
//! tile run, so it must stay allocation-free.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use geo_types::{Geometry, Point};
use stratum::{tags, world_bound, Config, Context, FeatureId, Graph, Node, Way};

fn restaurant_context() -> Context {
    let mut ctx = Context::new();
    ctx.bind(
        FeatureId::node(1),
        Arc::new(Geometry::Point(Point::new(0.0, 0.0))),
        tags(&[
            ("amenity", "restaurant"),
            ("cuisine", "burger"),
            ("name", "Kronnerburger"),
        ]),
    );
    ctx
}

fn bench_layer_matching(c: &mut Criterion) {
    let config = Config::load_default().unwrap();
    let mut group = c.benchmark_group("match");

    for name in ["roads", "buildings", "landuse", "pois", "water"] {
        let layer = &config.layers[name];
        let mut ctx = restaurant_context();

        group.bench_function(name, |b| {
            b.iter(|| {
                for filter in layer.filters() {
                    black_box(filter.matches(&mut ctx));
                }
            })
        });
    }

    group.finish();
}

fn bench_full_tile(c: &mut Criterion) {
    let config = Config::load_default().unwrap();

    let graph = Graph {
        nodes: vec![
            Node { id: 1, lat: 0.0, lon: 0.0, tags: tags(&[]) },
            Node { id: 2, lat: 0.0, lon: 0.001, tags: tags(&[]) },
            Node { id: 3, lat: 0.001, lon: 0.001, tags: tags(&[]) },
            Node { id: 4, lat: 0.001, lon: 0.0, tags: tags(&[]) },
            Node {
                id: 5,
                lat: 0.0005,
                lon: 0.0005,
                tags: tags(&[("amenity", "restaurant"), ("name", "Kronnerburger")]),
            },
        ],
        ways: vec![Way {
            id: 10,
            nodes: vec![1, 2, 3, 4, 1],
            tags: tags(&[("building", "yes"), ("building:levels", "7")]),
        }],
        relations: vec![],
    };

    c.bench_function("full_tile", |b| {
        b.iter(|| black_box(config.process(&graph, world_bound(), 16)))
    });
}

criterion_group!(benches, bench_layer_matching, bench_full_tile);
criterion_main!(benches);
