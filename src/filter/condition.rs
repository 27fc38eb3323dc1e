//! Boolean conditions compiled from rule documents.

use serde_yaml::Value as Doc;

use super::error::{type_name, CompileError};
use super::expression::{compile_num_expression, Expression};
use super::Context;
use crate::geometry::geometry_type;

/// Reserved tokens we have replaced with a different condition; ignored so
/// older rule bundles keep compiling.
const IGNORED_CONDITIONS: &[&str] = &["way"];

/// A compiled condition. Evaluates against the context's current tag map,
/// geometry and derived scalars.
#[derive(Debug, Clone)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    /// Evaluate the inner condition against the original OSM tags instead
    /// of the current (post-filter) tag map.
    OsmTags(Box<Condition>),
    /// Lowercased GeoJSON type names.
    GeometryTypes(Vec<String>),
    WayArea(MinMax),
    Volume(MinMax),
    Compare {
        left: Box<Expression>,
        op: CompareOp,
        right: Box<Expression>,
    },
    /// Tag equals a literal, e.g. `building: 'no'`.
    StringEq { key: String, val: String },
    /// Tag is one of a set, e.g. `protect_class: ['2', '3', '5']`.
    StringIn { key: String, vals: Vec<String> },
    /// Tag presence (true) or absence (false), e.g. `building: true`.
    BoolPresent { key: String, val: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Lte,
    Gte,
}

#[derive(Debug, Clone, Copy)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    fn eval(&self, val: f64) -> bool {
        val >= self.min && val <= self.max
    }
}

impl Condition {
    pub fn eval(&self, ctx: &mut Context) -> bool {
        match self {
            Condition::All(children) => {
                let mut result = true;
                for c in children {
                    if !c.eval(ctx) {
                        result = false;
                        if !ctx.debug {
                            return false;
                        }
                    }
                }
                result
            }
            Condition::Any(children) => {
                let mut result = false;
                for c in children {
                    if c.eval(ctx) {
                        result = true;
                        if !ctx.debug {
                            return true;
                        }
                    }
                }
                result
            }
            Condition::Not(inner) => !inner.eval(ctx),
            Condition::OsmTags(inner) => ctx.with_osm_tags(|ctx| inner.eval(ctx)),
            Condition::GeometryTypes(types) => {
                let Some(g) = ctx.geometry.as_deref() else {
                    return false;
                };
                let gt = geometry_type(g);
                types.iter().any(|t| t.eq_ignore_ascii_case(gt))
            }
            Condition::WayArea(mm) => mm.eval(ctx.area()),
            Condition::Volume(mm) => mm.eval(ctx.height() * ctx.area()),
            Condition::Compare { left, op, right } => {
                let l = left.eval_num(ctx);
                let r = right.eval_num(ctx);
                match op {
                    CompareOp::Lt => l < r,
                    CompareOp::Gt => l > r,
                    CompareOp::Lte => l <= r,
                    CompareOp::Gte => l >= r,
                }
            }
            Condition::StringEq { key, val } => ctx.tag(key) == val,
            Condition::StringIn { key, vals } => {
                let tag = ctx.tag(key);
                vals.iter().any(|v| v == tag)
            }
            Condition::BoolPresent { key, val } => ctx.tags.contains_key(key) == *val,
        }
    }

    /// Static evaluation-cost estimate: map lookups first, composites later,
    /// geometry and area last. Used to order `any`/`all` children so
    /// short-circuiting pays off as early as possible.
    fn cost(&self) -> u32 {
        match self {
            Condition::StringEq { .. } => 0,
            Condition::BoolPresent { .. } => 1,
            Condition::StringIn { .. } => 5,
            Condition::Not(_) => 5,
            Condition::GeometryTypes(_) => 5,
            Condition::All(_) => 10,
            Condition::Any(_) => 10,
            Condition::OsmTags(_) => 10,
            Condition::Compare { .. } => 15,
            Condition::WayArea(_) => 20,
            Condition::Volume(_) => 20,
        }
    }
}

/// Compile a parsed rule document into a condition. A sequence is an
/// implicit `all`.
pub fn compile_condition(doc: &Doc) -> Result<Condition, CompileError> {
    compile_all(doc)
}

fn compile_children(doc: &Doc, op: &'static str) -> Result<Vec<Condition>, CompileError> {
    let mut children = match doc {
        Doc::Sequence(seq) => seq
            .iter()
            .map(compile_condition)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.context(op))?,
        Doc::Mapping(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (k, v) in map {
                let key = k.as_str().ok_or_else(|| {
                    CompileError::new(format!("keys must be strings: {}", type_name(k)), doc)
                })?;

                if IGNORED_CONDITIONS.contains(&key) {
                    continue;
                }

                children.push(compile_property_cond(key, v).map_err(|e| e.context(op))?);
            }
            children
        }
        other => {
            return Err(CompileError::new(
                format!("{op}: unsupported type: {}", type_name(other)),
                doc,
            ))
        }
    };

    // Stable, so equal-cost children keep their document order.
    children.sort_by_key(Condition::cost);
    Ok(children)
}

fn compile_all(doc: &Doc) -> Result<Condition, CompileError> {
    Ok(Condition::All(compile_children(doc, "all")?))
}

fn compile_any(doc: &Doc) -> Result<Condition, CompileError> {
    Ok(Condition::Any(compile_children(doc, "any")?))
}

fn compile_property_cond(key: &str, val: &Doc) -> Result<Condition, CompileError> {
    match key {
        "all" => return compile_all(val),
        "any" => return compile_any(val),
        "not" => {
            return Ok(Condition::Not(Box::new(
                compile_condition(val).map_err(|e| e.context("not"))?,
            )))
        }
        "none" => {
            // none is not(any(..))
            return Ok(Condition::Not(Box::new(
                compile_any(val).map_err(|e| e.context("none"))?,
            )));
        }
        "osm_tags" => {
            return Ok(Condition::OsmTags(Box::new(
                compile_condition(val).map_err(|e| e.context("osm_tags"))?,
            )))
        }
        "compare" => return compile_compare(val),
        "way_area" => {
            return Ok(Condition::WayArea(
                compile_min_max(val).map_err(|e| e.context("way_area"))?,
            ))
        }
        "volume" => {
            return Ok(Condition::Volume(
                compile_min_max(val).map_err(|e| e.context("volume"))?,
            ))
        }
        "geometry_types" | "geom_type" => return compile_geometry_types(val),
        _ => {}
    }

    // Not an operator, so it must be a tag match.
    let key = clean_key(key).to_string();
    match val {
        Doc::Bool(b) => Ok(Condition::BoolPresent { key, val: *b }),
        Doc::String(s) => Ok(Condition::StringEq { key, val: s.clone() }),
        Doc::Sequence(seq) => {
            let vals = seq
                .iter()
                .map(scalar_to_lower_string)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.context(&key))?;
            Ok(Condition::StringIn { key, vals })
        }
        other => Err(CompileError::new(
            format!("property cond: {key}: unsupported type: {}", type_name(other)),
            val,
        )),
    }
}

fn scalar_to_lower_string(v: &Doc) -> Result<String, CompileError> {
    match v {
        Doc::String(s) => Ok(s.to_lowercase()),
        Doc::Number(n) => Ok(n.to_string()),
        other => Err(CompileError::new(
            format!("string in: requires strings: {}", type_name(other)),
            v,
        )),
    }
}

fn compile_compare(doc: &Doc) -> Result<Condition, CompileError> {
    let parts = match doc {
        Doc::Sequence(seq) if seq.len() == 3 => seq,
        other => {
            return Err(CompileError::new(
                format!(
                    "compare: requires 3 part array (eg. [3, 'lt', 5]): {}",
                    type_name(other)
                ),
                doc,
            ))
        }
    };

    let left = compile_num_expression(&parts[0]).map_err(|e| e.context("compare"))?;
    let right = compile_num_expression(&parts[2]).map_err(|e| e.context("compare"))?;

    let op = match parts[1].as_str() {
        Some("lt") => CompareOp::Lt,
        Some("gt") => CompareOp::Gt,
        Some("lte") => CompareOp::Lte,
        Some("gte") => CompareOp::Gte,
        _ => {
            return Err(CompileError::new(
                "compare: operator must be 'lt', 'gt', 'lte' or 'gte'",
                doc,
            ))
        }
    };

    Ok(Condition::Compare {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

fn compile_min_max(doc: &Doc) -> Result<MinMax, CompileError> {
    let map = doc.as_mapping().ok_or_else(|| {
        CompileError::new(
            format!("minmax: hash required (eg. {{ min:, max: }}): {}", type_name(doc)),
            doc,
        )
    })?;

    let mut mm = MinMax { min: f64::MIN, max: f64::MAX };
    if let Some(v) = map.get("min") {
        mm.min = doc_to_f64(v)
            .ok_or_else(|| CompileError::new("minmax: min is not a number", doc))?;
    }
    if let Some(v) = map.get("max") {
        mm.max = doc_to_f64(v)
            .ok_or_else(|| CompileError::new("minmax: max is not a number", doc))?;
    }

    Ok(mm)
}

fn compile_geometry_types(doc: &Doc) -> Result<Condition, CompileError> {
    let seq = match doc {
        Doc::Sequence(seq) => seq.clone(),
        Doc::String(s) => vec![Doc::String(s.clone())],
        other => {
            return Err(CompileError::new(
                format!(
                    "geometry_types: requires array of strings or string: {}",
                    type_name(other)
                ),
                doc,
            ))
        }
    };

    let types = seq
        .iter()
        .map(|v| {
            v.as_str().map(str::to_lowercase).ok_or_else(|| {
                CompileError::new(
                    format!("geometry_types: requires strings: {}", type_name(v)),
                    doc,
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Condition::GeometryTypes(types))
}

/// Numbers that may appear as YAML ints, floats or numeric strings.
pub(crate) fn doc_to_f64(v: &Doc) -> Option<f64> {
    match v {
        Doc::Number(n) => n.as_f64(),
        Doc::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn clean_key(key: &str) -> &str {
    key.strip_prefix("tags->").unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{tags, FeatureId};
    use geo_types::{Geometry, Point};
    use std::sync::Arc;

    fn compile(doc: &str) -> Condition {
        compile_condition(&serde_yaml::from_str(doc).unwrap()).unwrap()
    }

    fn point_ctx(pairs: &[(&str, &str)]) -> Context {
        let mut ctx = Context::new();
        ctx.bind(
            FeatureId::node(1),
            Arc::new(Geometry::Point(Point::new(0.0, 0.0))),
            tags(pairs),
        );
        ctx
    }

    #[test]
    fn string_and_bool_conds() {
        let cond = compile("{building: 'no'}");
        assert!(cond.eval(&mut point_ctx(&[("building", "no")])));
        assert!(!cond.eval(&mut point_ctx(&[("building", "yes")])));

        let cond = compile("{building: true}");
        assert!(cond.eval(&mut point_ctx(&[("building", "anything")])));
        assert!(!cond.eval(&mut point_ctx(&[])));

        let cond = compile("{building: false}");
        assert!(cond.eval(&mut point_ctx(&[])));
        assert!(!cond.eval(&mut point_ctx(&[("building", "yes")])));
    }

    #[test]
    fn string_in_lowercases_values() {
        let cond = compile("{protect_class: ['2', 'ABC', 5]}");
        assert!(cond.eval(&mut point_ctx(&[("protect_class", "2")])));
        assert!(cond.eval(&mut point_ctx(&[("protect_class", "abc")])));
        assert!(cond.eval(&mut point_ctx(&[("protect_class", "5")])));
        assert!(!cond.eval(&mut point_ctx(&[("protect_class", "3")])));
    }

    #[test]
    fn any_all_not_none() {
        let cond = compile("{any: [{highway: primary}, {highway: secondary}]}");
        assert!(cond.eval(&mut point_ctx(&[("highway", "secondary")])));
        assert!(!cond.eval(&mut point_ctx(&[("highway", "tertiary")])));

        let cond = compile("{all: {highway: primary, name: true}}");
        assert!(cond.eval(&mut point_ctx(&[("highway", "primary"), ("name", "x")])));
        assert!(!cond.eval(&mut point_ctx(&[("highway", "primary")])));

        let cond = compile("{none: [{highway: primary}, {highway: secondary}]}");
        assert!(cond.eval(&mut point_ctx(&[("highway", "tertiary")])));
        assert!(!cond.eval(&mut point_ctx(&[("highway", "primary")])));
    }

    #[test]
    fn implicit_all_for_sequences() {
        let cond = compile("[{highway: primary}, {name: true}]");
        assert!(cond.eval(&mut point_ctx(&[("highway", "primary"), ("name", "x")])));
        assert!(!cond.eval(&mut point_ctx(&[("highway", "primary")])));
    }

    #[test]
    fn unknown_reserved_token_is_ignored() {
        let cond = compile("{way: true, highway: primary}");
        assert!(cond.eval(&mut point_ctx(&[("highway", "primary")])));
    }

    #[test]
    fn tags_prefix_is_stripped() {
        let cond = compile("{'tags->location': underground}");
        assert!(cond.eval(&mut point_ctx(&[("location", "underground")])));
    }

    #[test]
    fn geometry_types_cond() {
        let cond = compile("{geometry_types: [point]}");
        assert!(cond.eval(&mut point_ctx(&[])));

        let cond = compile("{geom_type: polygon}");
        assert!(!cond.eval(&mut point_ctx(&[])));
    }

    #[test]
    fn compare_cond() {
        let cond = compile("{compare: [3, lt, 5]}");
        assert!(cond.eval(&mut point_ctx(&[])));

        let cond = compile("{compare: [5, lte, 5]}");
        assert!(cond.eval(&mut point_ctx(&[])));

        let cond = compile("{compare: [3, gt, 5]}");
        assert!(!cond.eval(&mut point_ctx(&[])));
    }

    #[test]
    fn compare_rejects_bad_operator() {
        let doc: Doc = serde_yaml::from_str("{compare: [3, eq, 5]}").unwrap();
        assert!(compile_condition(&doc).is_err());
    }

    #[test]
    fn compare_rejects_non_numeric_operand() {
        let doc: Doc = serde_yaml::from_str("{compare: [{col: name}, lt, 5]}").unwrap();
        assert!(compile_condition(&doc).is_err());
    }

    #[test]
    fn osm_tags_swaps_and_restores() {
        let cond = compile("{osm_tags: {name: secret}}");
        let mut ctx = point_ctx(&[("name", "public")]);
        ctx.osm_tags = tags(&[("name", "secret")]);
        assert!(cond.eval(&mut ctx));
        assert_eq!(ctx.tag("name"), "public");
    }

    #[test]
    fn children_sorted_by_cost() {
        let cond = compile("{any: [{way_area: {min: 1}}, {highway: primary}]}");
        let Condition::Any(children) = cond else {
            panic!("expected any");
        };
        assert!(matches!(children[0], Condition::StringEq { .. }));
        assert!(matches!(children[1], Condition::WayArea(_)));
    }

    #[test]
    fn sort_preserves_predicate() {
        // the cheap condition matches, the expensive one would not
        let cond = compile("{any: [{way_area: {min: 1.0e12}}, {highway: primary}]}");
        assert!(cond.eval(&mut point_ctx(&[("highway", "primary")])));
    }

    #[test]
    fn debug_mode_same_result() {
        let cond = compile("{any: [{highway: primary}, {name: true}]}");
        let mut ctx = point_ctx(&[("highway", "primary")]);
        let normal = cond.eval(&mut ctx);
        ctx.debug = true;
        assert_eq!(cond.eval(&mut ctx), normal);
    }
}
