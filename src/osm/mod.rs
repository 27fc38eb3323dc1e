//! OSM element graph input types and per-tile membership indexes.

mod topology;

pub use topology::{build_features, RawFeature};

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::TagMap;

/// The kind of OSM element a feature came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Node => "node",
            ElementType::Way => "way",
            ElementType::Relation => "relation",
        }
    }
}

/// A typed element id; node, way and relation ids are separate spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId {
    pub element: ElementType,
    pub id: i64,
}

impl FeatureId {
    pub fn node(id: i64) -> Self {
        FeatureId { element: ElementType::Node, id }
    }

    pub fn way(id: i64) -> Self {
        FeatureId { element: ElementType::Way, id }
    }

    pub fn relation(id: i64) -> Self {
        FeatureId { element: ElementType::Relation, id }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub tags: Arc<TagMap>,
}

#[derive(Debug, Clone)]
pub struct Way {
    pub id: i64,
    /// Ordered node references; resolved against the graph's nodes.
    pub nodes: Vec<i64>,
    pub tags: Arc<TagMap>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub element: ElementType,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Arc<TagMap>,
}

/// A parsed OSM element graph for one tile. How it was parsed (XML, PBF,
/// API) is the caller's concern.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub ways: Vec<Way>,
    pub relations: Vec<Relation>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn node(&self, id: i64) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Build a tag map from literal pairs; mostly a test convenience.
pub fn tags(pairs: &[(&str, &str)]) -> Arc<TagMap> {
    Arc::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// Read-only membership indexes, built once per tile run.
#[derive(Debug, Default)]
pub struct Membership {
    /// Node id -> tags of the ways containing that node. Only recorded for
    /// nodes that carry their own tags; untagged way nodes never become
    /// features, so their membership is never consulted.
    pub way: HashMap<i64, Vec<Arc<TagMap>>>,
    /// Element id -> tags of the relations referencing it.
    pub relation: HashMap<FeatureId, Vec<Arc<TagMap>>>,
}

impl Membership {
    pub fn build(graph: &Graph) -> Self {
        let tagged: HashMap<i64, bool> = graph
            .nodes
            .iter()
            .map(|n| (n.id, !n.tags.is_empty()))
            .collect();

        let mut way = HashMap::new();
        for w in &graph.ways {
            for &node_id in &w.nodes {
                if let Some(false) = tagged.get(&node_id) {
                    continue;
                }
                way.entry(node_id)
                    .or_insert_with(Vec::new)
                    .push(Arc::clone(&w.tags));
            }
        }

        let mut relation: HashMap<FeatureId, Vec<Arc<TagMap>>> = HashMap::new();
        for r in &graph.relations {
            for m in &r.members {
                let fid = FeatureId { element: m.element, id: m.id };
                relation
                    .entry(fid)
                    .or_default()
                    .push(Arc::clone(&r.tags));
            }
        }

        Membership { way, relation }
    }
}
