//! The rule engine core: conditions, expressions and per-layer filters
//! compiled once from YAML documents and evaluated per feature.

mod condition;
mod context;
mod error;
mod expression;
mod functions;
mod lookup;

pub use condition::{compile_condition, CompareOp, Condition};
pub use context::Context;
pub use error::CompileError;
pub use expression::{compile_expression, compile_num_expression, Expression};

use serde_yaml::Value as Doc;

use crate::value::Properties;

/// One filter of a layer: a predicate, the min zoom expression, and the
/// ordered output properties to compute on match.
#[derive(Debug, Clone)]
pub struct Filter {
    pub min_zoom: Option<Expression>,
    pub filter: Option<Condition>,
    /// Ordered: rule files depend on later outputs reading earlier ones.
    pub output: Vec<(String, Expression)>,
    /// `None` or `"osm"` matches OSM features; any other source table is
    /// not implemented here and never matches.
    pub table: Option<String>,
}

impl Filter {
    /// Compile one `filters:` entry of a layer document.
    pub fn compile(doc: &Doc) -> Result<Filter, CompileError> {
        let map = doc
            .as_mapping()
            .ok_or_else(|| CompileError::new("filter entry must be a mapping", doc))?;

        let table = map.get("table").and_then(Doc::as_str).map(str::to_string);

        let mut filter = Filter {
            min_zoom: None,
            filter: None,
            output: Vec::new(),
            table,
        };

        if !filter.is_osm() {
            // reserved for non-OSM sources; leave it compiled-empty
            return Ok(filter);
        }

        if let Some(mz) = map.get("min_zoom") {
            if !mz.is_null() {
                filter.min_zoom = Some(
                    compile_num_expression(mz).map_err(|e| e.context("min_zoom"))?,
                );
            }
        }

        if let Some(cond) = map.get("filter") {
            filter.filter = Some(compile_condition(cond).map_err(|e| e.context("filter"))?);
        }

        if let Some(output) = map.get("output") {
            let entries = output
                .as_mapping()
                .ok_or_else(|| CompileError::new("output must be a mapping", output))?;

            for (k, v) in entries {
                let key = k
                    .as_str()
                    .ok_or_else(|| CompileError::new("output keys must be strings", output))?;
                let expr = compile_expression(v)
                    .map_err(|e| e.context(&format!("output {key}")))?;
                if expr.is_nil() {
                    continue;
                }
                filter.output.push((key.to_string(), expr));
            }
        }

        Ok(filter)
    }

    fn is_osm(&self) -> bool {
        matches!(self.table.as_deref(), None | Some("") | Some("osm"))
    }

    /// Whether the feature in `ctx` matches this filter.
    pub fn matches(&self, ctx: &mut Context) -> bool {
        if !self.is_osm() {
            return false;
        }

        match &self.filter {
            Some(cond) => cond.eval(ctx),
            None => true,
        }
    }

    /// Evaluate the output expressions in order; nil values are omitted.
    pub fn properties(&self, ctx: &mut Context) -> Properties {
        let mut props = Properties::with_capacity(self.output.len() + 4);
        for (key, expr) in &self.output {
            if let Some(val) = expr.eval(ctx) {
                props.insert(key.clone(), val);
            }
        }

        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{tags, FeatureId};
    use crate::value::Value;
    use geo_types::{Geometry, Point};
    use std::sync::Arc;

    fn compile(doc: &str) -> Filter {
        Filter::compile(&serde_yaml::from_str(doc).unwrap()).unwrap()
    }

    fn ctx(pairs: &[(&str, &str)]) -> Context {
        let mut ctx = Context::new();
        ctx.bind(
            FeatureId::node(1),
            Arc::new(Geometry::Point(Point::new(0.0, 0.0))),
            tags(pairs),
        );
        ctx
    }

    #[test]
    fn match_and_outputs_in_order() {
        let f = compile(
            "
filter: {amenity: restaurant}
min_zoom: 17
output:
  kind: restaurant
  name: {col: name}
  cuisine: {col: cuisine}
",
        );

        let mut c = ctx(&[("amenity", "restaurant"), ("name", "Kronnerburger")]);
        assert!(f.matches(&mut c));

        let props = f.properties(&mut c);
        let keys: Vec<&str> = props.keys().collect();
        assert_eq!(keys, vec!["kind", "name"]); // cuisine is nil, omitted
        assert_eq!(props.get("kind"), Some(&Value::Str("restaurant".into())));
    }

    #[test]
    fn nil_outputs_dropped_at_compile() {
        let f = compile(
            "
filter: {amenity: parking}
output:
  kind: parking
  unused: ''
",
        );
        assert_eq!(f.output.len(), 1);
    }

    #[test]
    fn non_osm_table_never_matches() {
        let f = compile(
            "
table: ne_water
filter: {amenity: restaurant}
output: {kind: restaurant}
",
        );
        assert!(!f.matches(&mut ctx(&[("amenity", "restaurant")])));

        let f = compile(
            "
table: osm
filter: {amenity: restaurant}
output: {kind: restaurant}
",
        );
        assert!(f.matches(&mut ctx(&[("amenity", "restaurant")])));
    }

    #[test]
    fn missing_min_zoom_stays_none() {
        let f = compile("{filter: {amenity: parking}, output: {kind: parking}}");
        assert!(f.min_zoom.is_none());
    }

    #[test]
    fn compile_error_carries_document() {
        let doc: Doc = serde_yaml::from_str(
            "{filter: {amenity: restaurant}, min_zoom: {col: name}}",
        )
        .unwrap();
        let err = Filter::compile(&doc).unwrap_err();
        assert!(err.to_string().starts_with("min_zoom:"));
        assert!(!err.document_yaml().is_empty());
    }
}
