//! Raise feature min zooms based on a discrete property, pushing features
//! with a bad (high) rank into more detailed zoom levels.

use super::{Params, PostContext, PostProcess};
use crate::feature::Layers;
use crate::filter::CompileError;

pub struct ClampMinZoom {
    layer: String,
    start_zoom: f64,
    end_zoom: f64,
    property: String,
    clamp: Vec<(f64, f64)>,
}

impl ClampMinZoom {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        let clamp_map = params
            .mapping("clamp")
            .ok_or_else(|| CompileError::msg("clamp_min_zoom: clamp is required"))?;

        let mut clamp = Vec::with_capacity(clamp_map.len());
        for (k, v) in clamp_map {
            let (Some(k), Some(v)) = (k.as_i64(), v.as_i64()) else {
                return Err(CompileError::msg(
                    "clamp_min_zoom: clamp keys and values must be integers",
                ));
            };
            clamp.push((k as f64, v as f64));
        }

        Ok(ClampMinZoom {
            layer: params.require_str("layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(50.0),
            property: params.require_str("property")?,
            clamp,
        })
    }
}

impl PostProcess for ClampMinZoom {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom || ctx.zoom > self.end_zoom {
            return;
        }
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        for feature in layer.iter_mut() {
            let Some(val) = feature.properties.get(&self.property).and_then(|v| v.as_num())
            else {
                continue;
            };
            let Some(min_zoom) = feature.properties.get("min_zoom").and_then(|v| v.as_num())
            else {
                continue;
            };

            let Some((_, clamped)) = self.clamp.iter().find(|(k, _)| *k == val) else {
                continue;
            };

            if min_zoom < *clamped {
                feature.properties.insert("min_zoom", *clamped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::value::Properties;
    use geo_types::{Geometry, Point};

    fn compile(yaml: &str) -> ClampMinZoom {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        ClampMinZoom::compile(&Params { func: "clamp_min_zoom", map: doc.as_mapping() }).unwrap()
    }

    fn layers_with(scale_rank: f64, min_zoom: f64) -> Layers {
        let mut props = Properties::new();
        props.insert("scale_rank", scale_rank);
        props.insert("min_zoom", min_zoom);
        let mut layers = Layers::new();
        layers.insert(
            "buildings".to_string(),
            vec![Feature::new(
                std::sync::Arc::new(Geometry::Point(Point::new(0.0, 0.0))),
                props,
            )],
        );
        layers
    }

    fn ctx() -> PostContext {
        PostContext { zoom: 16.0, bound: crate::geometry::world_bound() }
    }

    const CONFIG: &str = "
layer: buildings
property: scale_rank
clamp: {3: 14, 4: 15, 5: 16}
";

    #[test]
    fn raises_min_zoom() {
        let f = compile(CONFIG);
        let mut layers = layers_with(3.0, 13.0);
        f.eval(&ctx(), &mut layers);
        assert_eq!(
            layers["buildings"][0].properties.num_or("min_zoom", 0.0),
            14.0
        );
    }

    #[test]
    fn never_lowers_min_zoom() {
        let f = compile(CONFIG);
        let mut layers = layers_with(3.0, 15.0);
        f.eval(&ctx(), &mut layers);
        assert_eq!(
            layers["buildings"][0].properties.num_or("min_zoom", 0.0),
            15.0
        );
    }

    #[test]
    fn values_without_entry_untouched() {
        let f = compile(CONFIG);
        let mut layers = layers_with(1.0, 13.0);
        f.eval(&ctx(), &mut layers);
        assert_eq!(
            layers["buildings"][0].properties.num_or("min_zoom", 0.0),
            13.0
        );
    }
}
