//! Remap one property's values through a string table. Like whitelist,
//! but values without a mapping keep their original value.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Params, PostContext, PostProcess};
use crate::feature::Layers;
use crate::filter::{CompileError, Condition, Context};

pub struct Remap {
    layer: String,
    start_zoom: f64,
    end_zoom: f64,
    property: String,
    condition: Option<Condition>,
    remap: HashMap<String, String>,
}

impl Remap {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(Remap {
            layer: params.require_str("layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(50.0),
            property: params.require_str("property")?,
            condition: params.opt_condition("where")?,
            remap: params
                .string_map("remap")?
                .ok_or_else(|| CompileError::msg("remap: remap is required"))?,
        })
    }
}

impl PostProcess for Remap {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom || ctx.zoom > self.end_zoom {
            return;
        }
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        for feature in layer.iter_mut() {
            if let Some(cond) = &self.condition {
                let mut fctx = Context::from_properties(&feature.properties);
                fctx.geometry = Some(Arc::clone(&feature.geometry));
                if !cond.eval(&mut fctx) {
                    continue;
                }
            }

            let Some(val) = feature.properties.get(&self.property).and_then(|v| v.as_str())
            else {
                continue;
            };

            if let Some(mapped) = self.remap.get(val) {
                feature
                    .properties
                    .insert(self.property.clone(), mapped.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;
    use crate::value::{Properties, Value};
    use geo_types::{Geometry, Point};

    fn compile(yaml: &str) -> Remap {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        Remap::compile(&Params { func: "remap", map: doc.as_mapping() }).unwrap()
    }

    fn layer_with_kind(kind: &str) -> Layers {
        let mut props = Properties::new();
        props.insert("kind", kind);
        let mut layers = Layers::new();
        layers.insert(
            "landuse".to_string(),
            vec![Feature::new(
                std::sync::Arc::new(Geometry::Point(Point::new(0.0, 0.0))),
                props,
            )],
        );
        layers
    }

    fn ctx(zoom: f64) -> PostContext {
        PostContext { zoom, bound: crate::geometry::world_bound() }
    }

    #[test]
    fn remaps_known_values() {
        let f = compile(
            "
layer: landuse
start_zoom: 13
end_zoom: 13
property: kind
remap: {scrub: wood, forest: wood}
",
        );

        let mut layers = layer_with_kind("scrub");
        f.eval(&ctx(13.0), &mut layers);
        assert_eq!(layers["landuse"][0].properties.str_or("kind", ""), "wood");
    }

    #[test]
    fn unknown_values_keep_original() {
        let f = compile(
            "{layer: landuse, property: kind, remap: {scrub: wood}}",
        );
        let mut layers = layer_with_kind("park");
        f.eval(&ctx(13.0), &mut layers);
        assert_eq!(layers["landuse"][0].properties.str_or("kind", ""), "park");
    }

    #[test]
    fn outside_zoom_window_untouched() {
        let f = compile(
            "{layer: landuse, start_zoom: 13, end_zoom: 13, property: kind, remap: {scrub: wood}}",
        );
        let mut layers = layer_with_kind("scrub");
        f.eval(&ctx(14.0), &mut layers);
        assert_eq!(layers["landuse"][0].properties.str_or("kind", ""), "scrub");
    }

    #[test]
    fn condition_gates_features() {
        let f = compile(
            "{layer: landuse, property: kind, remap: {scrub: wood}, where: {zone: rural}}",
        );
        let mut layers = layer_with_kind("scrub");
        f.eval(&ctx(13.0), &mut layers);
        assert_eq!(layers["landuse"][0].properties.str_or("kind", ""), "scrub");

        let mut layers = layer_with_kind("scrub");
        layers.get_mut("landuse").unwrap()[0]
            .properties
            .insert("zone", Value::Str("rural".into()));
        f.eval(&ctx(13.0), &mut layers);
        assert_eq!(layers["landuse"][0].properties.str_or("kind", ""), "wood");
    }
}
