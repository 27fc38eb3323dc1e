//! Named asset resolution for rule documents and lookup tables.

use std::borrow::Cow;
use std::path::PathBuf;

/// Resolves named blobs: the root rule document, per-layer documents and
/// the tabular assets post-processors load at compile time.
pub trait Assets {
    fn resolve(&self, name: &str) -> Option<Cow<'_, [u8]>>;
}

/// The default rule bundle, compiled into the binary so no filesystem is
/// needed at runtime.
pub struct EmbeddedAssets;

static EMBEDDED: &[(&str, &[u8])] = &[
    ("queries.yaml", include_bytes!("../config/queries.yaml")),
    ("collision_rank.yaml", include_bytes!("../config/collision_rank.yaml")),
    ("yaml/boundaries.yaml", include_bytes!("../config/yaml/boundaries.yaml")),
    ("yaml/buildings.yaml", include_bytes!("../config/yaml/buildings.yaml")),
    ("yaml/earth.yaml", include_bytes!("../config/yaml/earth.yaml")),
    ("yaml/landuse.yaml", include_bytes!("../config/yaml/landuse.yaml")),
    ("yaml/places.yaml", include_bytes!("../config/yaml/places.yaml")),
    ("yaml/pois.yaml", include_bytes!("../config/yaml/pois.yaml")),
    ("yaml/roads.yaml", include_bytes!("../config/yaml/roads.yaml")),
    ("yaml/transit.yaml", include_bytes!("../config/yaml/transit.yaml")),
    ("yaml/water.yaml", include_bytes!("../config/yaml/water.yaml")),
    (
        "spreadsheets/scale_rank/buildings.csv",
        include_bytes!("../config/spreadsheets/scale_rank/buildings.csv"),
    ),
    (
        "spreadsheets/sort_rank/buildings.csv",
        include_bytes!("../config/spreadsheets/sort_rank/buildings.csv"),
    ),
];

impl Assets for EmbeddedAssets {
    fn resolve(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, data)| Cow::Borrowed(*data))
    }
}

/// A filesystem resolver rooted at a config directory, for tests and
/// alternate bundles.
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirAssets { root: root.into() }
    }
}

impl Assets for DirAssets {
    fn resolve(&self, name: &str) -> Option<Cow<'_, [u8]>> {
        std::fs::read(self.root.join(name)).ok().map(Cow::Owned)
    }
}
