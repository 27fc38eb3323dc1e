//! Round building heights to a zoom-dependent step so mid-zoom tiles
//! compress better.

use std::sync::LazyLock;

use regex::Regex;

use super::{Params, PostContext, PostProcess};
use crate::feature::Layers;
use crate::filter::CompileError;
use crate::value::Value;

pub struct QuantizeHeight {
    layer: String,
    start_zoom: f64,
    end_zoom: f64,
    /// (zoom, step) pairs.
    steps: Vec<(i64, f64)>,
}

/// Values below the step floor to one step rather than rounding to zero.
fn quantize(val: f64, step: f64) -> f64 {
    if val < step {
        return step.floor();
    }

    (step * (val / step).round()).floor()
}

static STEP_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"quantize_height_round_nearest_(\d+)_meters$").unwrap());

impl QuantizeHeight {
    pub fn compile(params: &Params) -> Result<Self, CompileError> {
        let quantize = params
            .mapping("quantize")
            .ok_or_else(|| CompileError::msg("quantize_height: quantize is required"))?;

        let mut steps = Vec::with_capacity(quantize.len());
        for (zoom, func) in quantize {
            let zoom = zoom
                .as_i64()
                .ok_or_else(|| CompileError::msg("quantize_height: zoom must be an integer"))?;

            let step = func
                .as_str()
                .and_then(|f| STEP_FN.captures(f))
                .and_then(|m| m[1].parse::<f64>().ok())
                .ok_or_else(|| {
                    CompileError::msg("quantize_height: unrecognised quantize function")
                })?;

            steps.push((zoom, step));
        }

        Ok(QuantizeHeight {
            layer: params.require_str("source_layer")?,
            start_zoom: params.opt_zoom("start_zoom")?.unwrap_or(0.0),
            end_zoom: params.opt_zoom("end_zoom")?.unwrap_or(50.0),
            steps,
        })
    }
}

impl PostProcess for QuantizeHeight {
    fn eval(&self, ctx: &PostContext, layers: &mut Layers) {
        if ctx.zoom < self.start_zoom || ctx.zoom > self.end_zoom {
            return;
        }

        let Some((_, step)) = self.steps.iter().find(|(z, _)| *z as f64 == ctx.zoom) else {
            return;
        };
        let Some(layer) = layers.get_mut(&self.layer) else {
            return;
        };

        for feature in layer.iter_mut() {
            if let Some(Value::Num(height)) = feature.properties.get("height") {
                let quantized = quantize(*height, *step);
                feature.properties.insert("height", quantized);
            }
        }
    }
}
