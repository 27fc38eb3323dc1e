//! Layer-level post-processing passes, compiled from the `post_process`
//! section of the root rule document and run in declared order over the
//! assembled layer set.

mod clamp_min_zoom;
mod functions;
mod quantize_height;
mod remap;
mod whitelist;

pub use functions::{clip_and_wrap_geometry, set_conditional_names};

use std::collections::HashMap;

use serde::Deserialize;
use serde_yaml::Value as Doc;

use crate::asset::Assets;
use crate::feature::Layers;
use crate::filter::{compile_condition, CompileError, Condition};
use crate::geometry::Bound;
use crate::transform::TAG_NAME_ALTERNATES;

/// A compiled post-processing pass.
pub trait PostProcess: Send + Sync {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers);
}

/// Request-level context shared by all passes of a tile run.
pub struct PostContext {
    pub zoom: f64,
    pub bound: Bound,
}

/// Compile-time context: asset resolution plus the per-layer clip factors
/// collected from the layer configs.
pub struct CompileContext<'a> {
    pub assets: &'a dyn Assets,
    pub clip_factors: &'a HashMap<String, f64>,
}

/// One entry of the `post_process` pipeline, as parsed from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct PostProcessConfig {
    #[serde(rename = "fn")]
    pub func: String,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub params: Doc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub matcher: Option<Resource>,
    #[serde(default)]
    pub ranker: Option<Resource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub init_fn: Option<String>,
    pub path: String,
}

/// Functions the original rule source names but which are not implemented
/// here; they compile to nothing rather than failing, for forward
/// compatibility.
const UNIMPLEMENTED: &[&str] = &[
    "build_fence",
    "drop_properties",
    "exterior_boundaries",
    "drop_features_mz_min_pixels",
    "overlap",
    "admin_boundaries",
    "apply_disputed_boundary_viewpoints",
    "drop_names_on_short_boundaries",
    "merge_line_features",
    "merge_building_features",
    "merge_polygon_features",
    "generate_address_points",
    "merge_duplicate_stations",
    "normalize_station_properties",
    "rank_features",
    "keep_n_features",
    "drop_properties_with_prefix",
    "drop_small_inners",
    "simplify_and_clip",
    "intercut",
    "simplify_layer",
    "buildings_unify",
    "palettize_colours",
    "point_in_country_logic",
    "tags_set_ne_min_max_zoom",
    "drop_layer",
    "max_zoom_filter",
    "min_zoom_filter",
    "update_min_zoom",
];

/// Compile one pipeline entry. `Ok(None)` means the function is known but
/// deliberately not implemented.
pub fn compile(
    ctx: &CompileContext,
    cfg: &PostProcessConfig,
) -> Result<Option<Box<dyn PostProcess>>, CompileError> {
    let name = cfg
        .func
        .strip_prefix("vectordatasource.transform.")
        .unwrap_or(&cfg.func);

    if UNIMPLEMENTED.contains(&name) {
        return Ok(None);
    }

    let params = Params { func: name, map: cfg.params.as_mapping() };

    let pass: Box<dyn PostProcess> = match name {
        "numeric_min_filter" => Box::new(functions::NumericMinFilter::compile(&params)?),
        "drop_features_where" => Box::new(functions::DropFeaturesWhere::compile(&params)?),
        "drop_names" => Box::new(functions::DropNames::compile(&params)?),
        "remap" => Box::new(remap::Remap::compile(&params)?),
        "whitelist" => Box::new(whitelist::Whitelist::compile(&params)?),
        "clamp_min_zoom" => Box::new(clamp_min_zoom::ClampMinZoom::compile(&params)?),
        "quantize_height" => Box::new(quantize_height::QuantizeHeight::compile(&params)?),
        "update_parenthetical_properties" => {
            Box::new(functions::UpdateParentheticalProperties::compile(&params)?)
        }
        "remove_duplicate_features" => {
            Box::new(functions::RemoveDuplicateFeatures::compile(&params)?)
        }
        "handle_label_placement" => {
            Box::new(functions::HandleLabelPlacement::compile(ctx, &params)?)
        }
        "backfill_from_other_layer" => {
            Box::new(functions::BackfillFromOtherLayer::compile(&params)?)
        }
        "csv_match_properties" => {
            Box::new(functions::CsvMatchProperties::compile(ctx, cfg, &params)?)
        }
        "add_collision_rank" => Box::new(functions::AddCollisionRank::compile(ctx, cfg)?),
        "road_networks" => Box::new(functions::RoadNetworks::compile(&params)?),
        "clip_and_wrap_geometry" => Box::new(functions::ClipAndWrap),
        _ => {
            return Err(CompileError::msg(format!(
                "post process: unsupported function: {name}"
            )))
        }
    };

    Ok(Some(pass))
}

/// True if the key is one of the many spellings of "name": the plain tag,
/// translations like `name:en`, and alternates like `official_name`.
pub(crate) fn key_is_name(key: &str) -> bool {
    if key == "name" {
        return true;
    }

    if key.starts_with("name:") {
        return true;
    }

    TAG_NAME_ALTERNATES.iter().any(|alt| key.starts_with(alt))
}

pub(crate) fn has_name(props: &crate::value::Properties) -> bool {
    props.keys().any(key_is_name)
}

/// Typed access to a pass's `params` mapping, with uniform error messages.
pub(crate) struct Params<'a> {
    func: &'a str,
    map: Option<&'a serde_yaml::Mapping>,
}

impl<'a> Params<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Doc> {
        self.map.and_then(|m| m.get(key))
    }

    pub fn require_str(&self, key: &str) -> Result<String, CompileError> {
        self.get(key)
            .and_then(Doc::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CompileError::msg(format!("{}: {key} must be defined", self.func))
            })
    }

    pub fn opt_str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Doc::as_str)
    }

    /// An optional zoom parameter; present but non-integer is an error.
    pub fn opt_zoom(&self, key: &str) -> Result<Option<f64>, CompileError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.as_i64().map(|z| Some(z as f64)).ok_or_else(|| {
                CompileError::msg(format!("{}: {key} must be an integer", self.func))
            }),
        }
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, CompileError> {
        self.get(key).and_then(Doc::as_f64).ok_or_else(|| {
            CompileError::msg(format!("{}: {key} must be a number", self.func))
        })
    }

    pub fn opt_strings(&self, key: &str) -> Result<Option<Vec<String>>, CompileError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => {
                let seq = v.as_sequence().ok_or_else(|| {
                    CompileError::msg(format!("{}: {key} must be a list", self.func))
                })?;
                seq.iter()
                    .map(|s| {
                        s.as_str().map(str::to_string).ok_or_else(|| {
                            CompileError::msg(format!(
                                "{}: {key} must be a list of strings",
                                self.func
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Some)
            }
        }
    }

    pub fn require_strings(&self, key: &str) -> Result<Vec<String>, CompileError> {
        self.opt_strings(key)?.ok_or_else(|| {
            CompileError::msg(format!("{}: {key} must be defined", self.func))
        })
    }

    pub fn opt_condition(&self, key: &str) -> Result<Option<Condition>, CompileError> {
        match self.get(key) {
            None => Ok(None),
            Some(doc) => compile_condition(doc)
                .map(Some)
                .map_err(|e| e.context(self.func)),
        }
    }

    pub fn require_condition(&self, key: &str) -> Result<Condition, CompileError> {
        self.opt_condition(key)?.ok_or_else(|| {
            CompileError::msg(format!("{}: {key} must be defined", self.func))
        })
    }

    pub fn mapping(&self, key: &str) -> Option<&'a serde_yaml::Mapping> {
        self.get(key).and_then(Doc::as_mapping)
    }

    /// A string-to-string mapping parameter, e.g. a remap table.
    pub fn string_map(&self, key: &str) -> Result<Option<HashMap<String, String>>, CompileError> {
        let Some(map) = self.get(key) else {
            return Ok(None);
        };
        let map = map.as_mapping().ok_or_else(|| {
            CompileError::msg(format!("{}: {key} should be a map", self.func))
        })?;

        let mut out = HashMap::with_capacity(map.len());
        for (k, v) in map {
            let (Some(k), Some(v)) = (k.as_str(), v.as_str()) else {
                return Err(CompileError::msg(format!(
                    "{}: {key} keys and values must be strings",
                    self.func
                )));
            };
            out.insert(k.to_string(), v.to_string());
        }

        Ok(Some(out))
    }
}
