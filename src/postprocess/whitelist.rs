//! Apply a whitelist to one property: values outside the allowed set are
//! remapped if possible, otherwise the property is deleted.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Params, PostContext, PostProcess};
use crate::feature::Layers;
use crate::filter::{CompileError, Condition, Context};

pub struct Whitelist {
    layer: String,
    start_zoom: f64,
    end_zoom: f64,
    property: String,
    condition: Option<Condition>,
    whitelist: Vec<String>,
    remap: Option<HashMap<String, String>>,
}

impl Whitelist {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        Ok(Whitelist {
            layer: params.require_str("layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(50.0),
            property: params.require_str("property")?,
            condition: params.opt_condition("where")?,
            whitelist: params.require_strings("whitelist")?,
            remap: params.string_map("remap")?,
        })
    }
}

impl PostProcess for Whitelist {
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

            if self.whitelist.iter().any(|w| w == val) {
                continue;
            }

            match self.remap.as_ref().and_then(|m| m.get(val)) {
                Some(mapped) => {
                    feature
                        .properties
                        .insert(self.property.clone(), mapped.clone());
                }
                None => {
                    feature.properties.remove(&self.property);
                }
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

    fn compile(yaml: &str) -> Whitelist {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        Whitelist::compile(&Params { func: "whitelist", map: doc.as_mapping() }).unwrap()
    }

    fn layer_with_kind_detail(val: &str) -> Layers {
        let mut props = Properties::new();
        props.insert("kind_detail", val);
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

    #[test]
    fn allowed_values_kept() {
        let f = compile(
            "{layer: buildings, property: kind_detail, whitelist: [church, school]}",
        );
        let mut layers = layer_with_kind_detail("church");
        f.eval(&ctx(), &mut layers);
        assert_eq!(
            layers["buildings"][0].properties.str_or("kind_detail", ""),
            "church"
        );
    }

    #[test]
    fn unknown_values_deleted() {
        let f = compile(
            "{layer: buildings, property: kind_detail, whitelist: [church, school]}",
        );
        let mut layers = layer_with_kind_detail("shed");
        f.eval(&ctx(), &mut layers);
        assert!(!layers["buildings"][0].properties.contains_key("kind_detail"));
    }

    #[test]
    fn remap_applies_before_deletion() {
        let f = compile(
            "
layer: buildings
property: kind_detail
whitelist: [church, school]
remap: {chapel: church}
",
        );
        let mut layers = layer_with_kind_detail("chapel");
        f.eval(&ctx(), &mut layers);
        assert_eq!(
            layers["buildings"][0].properties.str_or("kind_detail", ""),
            "church"
        );
    }
}
