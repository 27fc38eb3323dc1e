//! Turn raw OpenStreetMap element graphs into named, styled, per-tile
//! vector map layers.
//!
//! A declarative rule bundle (YAML documents plus CSV/YAML lookup tables)
//! is compiled once into an immutable program of typed conditions,
//! expressions, transforms and post-processors, then executed per feature,
//! per tile:
//!
//! ```no_run
//! use stratum::{Config, Graph};
//!
//! let config = Config::load_default()?;
//! let graph = Graph::new(); // parsed OSM elements for the tile
//! let layers = config.process(&graph, stratum::world_bound(), 16);
//! for (name, features) in &layers {
//!     println!("{name}: {} features", features.len());
//! }
//! # Ok::<(), stratum::CompileError>(())
//! ```
//!
//! The compiled [`Config`] is immutable and shareable across threads; a
//! single tile evaluation is single-threaded and allocation-shy.

mod asset;
mod config;
mod feature;
mod filter;
mod geometry;
mod matcher;
mod osm;
mod postprocess;
mod process;
mod ranker;
mod transform;
mod util;
mod value;

pub use asset::{Assets, DirAssets, EmbeddedAssets};
pub use config::{Config, Layer};
pub use feature::{Feature, FeatureCollection, Layers};
pub use filter::{CompileError, Condition, Context, Expression, Filter};
pub use geometry::{world_bound, Bound};
pub use osm::{
    build_features, tags, ElementType, FeatureId, Graph, Member, Membership, Node, RawFeature,
    Relation, Way,
};
pub use value::{Properties, TagMap, Value};
