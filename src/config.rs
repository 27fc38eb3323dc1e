//! Loading and compiling the rule bundle: the root document, per-layer
//! filter documents and the post-processor pipeline.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::asset::{Assets, DirAssets, EmbeddedAssets};
use crate::filter::{CompileError, Filter};
use crate::postprocess::{self, PostProcess, PostProcessConfig};
use crate::transform::{self, Transform};

/// Raw root document, as deserialised from `queries.yaml`.
#[derive(Debug, Deserialize)]
struct RawConfig {
    all: Vec<String>,
    layers: HashMap<String, RawLayer>,
    #[serde(default)]
    post_process: Vec<PostProcessConfig>,
}

#[derive(Debug, Deserialize)]
struct RawLayer {
    #[serde(default)]
    clip_factor: Option<f64>,
    #[serde(default)]
    geometry_types: Vec<String>,
    #[serde(default, rename = "transform")]
    transforms: Vec<String>,

    // accepted but currently unused
    #[serde(default)]
    sort: Option<String>,
    #[serde(default, rename = "area-inclusion-threshold")]
    area_inclusion_threshold: Option<i64>,
}

/// The compiled rule program: immutable after load and freely shareable
/// across threads.
pub struct Config {
    /// Layer names in evaluation order.
    pub all: Vec<String>,
    pub layers: HashMap<String, Layer>,
    /// Disable short-circuit evaluation so every sub-expression runs; used
    /// to validate that rules don't hide runtime faults. Results must not
    /// change.
    pub debug: bool,
    pub(crate) post_processors: Vec<Box<dyn PostProcess>>,
    pub(crate) clip_factors: HashMap<String, f64>,
}

/// One compiled layer: geometry gates, the ordered filter list and the
/// transforms to run on matches.
pub struct Layer {
    pub name: String,
    pub clip_factor: f64,
    pub geometry_types: Vec<String>,
    pub sort: Option<String>,
    pub area_inclusion_threshold: Option<i64>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) transforms: Vec<Transform>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("all", &self.all)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load and compile the bundle embedded in this crate.
    pub fn load_default() -> Result<Config, CompileError> {
        Config::load(&EmbeddedAssets)
    }

    /// Load and compile a bundle from a config directory on disk.
    pub fn from_dir(path: impl AsRef<Path>) -> Result<Config, CompileError> {
        Config::load(&DirAssets::new(path.as_ref()))
    }

    /// Load and compile a bundle through an asset resolver. A partial
    /// compile is never returned: the first error aborts the load.
    pub fn load(assets: &dyn Assets) -> Result<Config, CompileError> {
        let data = assets
            .resolve("queries.yaml")
            .ok_or_else(|| CompileError::msg("asset not found: queries.yaml"))?;
        let raw: RawConfig = serde_yaml::from_slice(&data)
            .map_err(|e| CompileError::msg(format!("failed to unmarshal: {e}")))?;

        let mut layers = HashMap::with_capacity(raw.all.len());
        let mut clip_factors = HashMap::with_capacity(raw.all.len());
        for name in &raw.all {
            let raw_layer = raw
                .layers
                .get(name)
                .ok_or_else(|| CompileError::msg(format!("undefined layer: {name}")))?;

            let layer = Layer::load(name, raw_layer, assets).map_err(|e| e.context(name))?;
            clip_factors.insert(name.clone(), layer.clip_factor);
            layers.insert(name.clone(), layer);
        }

        let ppctx = postprocess::CompileContext { assets, clip_factors: &clip_factors };
        let mut post_processors = Vec::with_capacity(raw.post_process.len());
        for (i, cfg) in raw.post_process.iter().enumerate() {
            let compiled = postprocess::compile(&ppctx, cfg)
                .map_err(|e| e.context(&format!("post process {i}")))?;
            if let Some(pass) = compiled {
                post_processors.push(pass);
            }
        }

        Ok(Config {
            all: raw.all,
            layers,
            debug: false,
            post_processors,
            clip_factors,
        })
    }
}

impl Layer {
    /// The compiled filters, in document order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    fn load(name: &str, raw: &RawLayer, assets: &dyn Assets) -> Result<Layer, CompileError> {
        let path = format!("yaml/{name}.yaml");
        let data = assets
            .resolve(&path)
            .ok_or_else(|| CompileError::msg(format!("failed to load {path}")))?;

        let filters = compile_layer_filters(&data)?;

        let mut transforms = Vec::with_capacity(raw.transforms.len());
        for t in &raw.transforms {
            match transform::lookup(t) {
                None => {
                    return Err(CompileError::msg(format!("transform undefined: {t}")));
                }
                Some(None) => {} // known, deliberately nothing to do
                Some(Some(f)) => transforms.push(f),
            }
        }

        Ok(Layer {
            name: name.to_string(),
            clip_factor: raw.clip_factor.unwrap_or(1.0),
            geometry_types: raw.geometry_types.clone(),
            sort: raw.sort.clone(),
            area_inclusion_threshold: raw.area_inclusion_threshold,
            filters,
            transforms,
        })
    }
}

fn compile_layer_filters(data: &[u8]) -> Result<Vec<Filter>, CompileError> {
    let doc: serde_yaml::Value = serde_yaml::from_slice(data)
        .map_err(|e| CompileError::msg(format!("failed to unmarshal: {e}")))?;

    let entries = doc
        .get("filters")
        .and_then(serde_yaml::Value::as_sequence)
        .ok_or_else(|| CompileError::new("layer document needs a filters list", &doc))?;

    let mut filters = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let filter =
            Filter::compile(entry).map_err(|e| e.context(&format!("failed on filter {i}")))?;
        filters.push(filter);
    }

    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    struct MapAssets(HashMap<&'static str, &'static str>);

    impl Assets for MapAssets {
        fn resolve(&self, name: &str) -> Option<Cow<'_, [u8]>> {
            self.0.get(name).map(|s| Cow::Borrowed(s.as_bytes()))
        }
    }

    fn assets(root: &'static str, layer: &'static str) -> MapAssets {
        MapAssets(HashMap::from([
            ("queries.yaml", root),
            ("yaml/test.yaml", layer),
        ]))
    }

    const ROOT: &str = "
all: [test]
layers:
  test:
    geometry_types: [Point]
    transform: [normalize_tourism_kind]
";

    #[test]
    fn load_compiles_layers() {
        let config = Config::load(&assets(
            ROOT,
            "
filters:
  - filter: {amenity: restaurant}
    min_zoom: 17
    output: {kind: restaurant}
",
        ))
        .unwrap();

        assert_eq!(config.all, vec!["test"]);
        let layer = &config.layers["test"];
        assert_eq!(layer.filters.len(), 1);
        assert_eq!(layer.transforms.len(), 1);
        assert_eq!(layer.clip_factor, 1.0);
    }

    #[test]
    fn undefined_layer_fails() {
        let config = Config::load(&assets("all: [missing]\nlayers: {}\n", ""));
        assert!(config.is_err());
    }

    #[test]
    fn undefined_transform_fails() {
        let err = Config::load(&assets(
            "
all: [test]
layers:
  test:
    geometry_types: [Point]
    transform: [no_such_transform]
",
            "filters: []\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("transform undefined"));
    }

    #[test]
    fn filter_error_names_the_layer_and_index() {
        let err = Config::load(&assets(
            "
all: [test]
layers:
  test:
    geometry_types: [Point]
",
            "
filters:
  - filter: {amenity: restaurant}
    min_zoom: {col: name}
",
        ))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("test"), "{msg}");
        assert!(msg.contains("filter 0"), "{msg}");
    }

    #[test]
    fn default_bundle_compiles() {
        let config = Config::load_default().unwrap();
        assert!(config.all.contains(&"buildings".to_string()));
        assert!(config.all.contains(&"pois".to_string()));
        assert!(!config.post_processors.is_empty());
    }

    #[test]
    fn config_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Config>();
    }
}
