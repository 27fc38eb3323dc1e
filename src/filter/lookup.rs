//! The `lookup` expression: a first-match scan over a numeric table.

use serde_yaml::Value as Doc;

use super::condition::doc_to_f64;
use super::error::CompileError;
use super::expression::{compile_expression, compile_num_expression, Expression};
use super::Context;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Generic lookup: scan the table top-down and return the first `then`
/// whose threshold matches the key; otherwise the default.
#[derive(Debug, Clone)]
pub struct LookupExpr {
    pub key: Expression,
    pub op: LookupOp,
    pub values: Vec<f64>,
    pub thens: Vec<Value>,
    pub default: Expression,
}

impl LookupExpr {
    pub fn eval(&self, ctx: &mut Context) -> Option<Value> {
        let key = self.key.eval_num(ctx);

        for (val, then) in self.values.iter().zip(&self.thens) {
            let matched = match self.op {
                LookupOp::Gte => key >= *val,
                LookupOp::Gt => key > *val,
                LookupOp::Lte => key <= *val,
                LookupOp::Lt => key < *val,
            };
            if matched {
                return Some(then.clone());
            }
        }

        self.default.eval(ctx)
    }
}

/// Numeric lookup, used when the key, default and every `then` are numeric.
/// The common `<=` and `>=` operators get dedicated scan loops with no
/// operator dispatch inside.
#[derive(Debug, Clone)]
pub struct NumLookupExpr {
    pub key: Expression,
    pub op: LookupOp,
    pub values: Vec<f64>,
    pub thens: Vec<f64>,
    pub default: Expression,
}

impl NumLookupExpr {
    pub fn eval_num(&self, ctx: &mut Context) -> f64 {
        let key = self.key.eval_num(ctx);

        match self.op {
            LookupOp::Lte => {
                for (val, then) in self.values.iter().zip(&self.thens) {
                    if key <= *val {
                        return *then;
                    }
                }
            }
            LookupOp::Gte => {
                for (val, then) in self.values.iter().zip(&self.thens) {
                    if key >= *val {
                        return *then;
                    }
                }
            }
            LookupOp::Lt => {
                for (val, then) in self.values.iter().zip(&self.thens) {
                    if key < *val {
                        return *then;
                    }
                }
            }
            LookupOp::Gt => {
                for (val, then) in self.values.iter().zip(&self.thens) {
                    if key > *val {
                        return *then;
                    }
                }
            }
        }

        self.default.eval_num(ctx)
    }
}

pub fn compile_lookup_expr(doc: &Doc) -> Result<Expression, CompileError> {
    let map = doc
        .as_mapping()
        .ok_or_else(|| CompileError::new("lookup: must be a hash", doc))?;

    let default = map
        .get("default")
        .ok_or_else(|| CompileError::new("lookup: must have default attribute", doc))?;
    let default = compile_expression(default).map_err(|e| e.context("lookup: default"))?;

    let key = map
        .get("key")
        .ok_or_else(|| CompileError::new("lookup: must have key attribute", doc))?;
    let key = compile_num_expression(key).map_err(|e| e.context("lookup: key"))?;

    let op = match map.get("op").and_then(Doc::as_str) {
        Some("<") => LookupOp::Lt,
        Some("<=") => LookupOp::Lte,
        Some(">") => LookupOp::Gt,
        Some(">=") => LookupOp::Gte,
        _ => {
            return Err(CompileError::new(
                "lookup: op must be one of '<', '>', '<=', '>='",
                doc,
            ))
        }
    };

    let table = map
        .get("table")
        .and_then(Doc::as_sequence)
        .ok_or_else(|| CompileError::new("lookup: table attribute must be an array", doc))?;

    let mut values = Vec::with_capacity(table.len());
    let mut thens = Vec::with_capacity(table.len());
    for (i, row) in table.iter().enumerate() {
        let parts = match row.as_sequence() {
            Some(parts) if parts.len() == 2 => parts,
            _ => {
                return Err(CompileError::new(
                    format!("lookup: table element {i} must be a 2 element array"),
                    doc,
                ))
            }
        };

        values.push(
            doc_to_f64(&parts[1])
                .ok_or_else(|| CompileError::new("lookup: threshold is not a number", row))?,
        );
        thens.push(then_value(&parts[0], row)?);
    }

    // Promote to the numeric variant when statically possible.
    let all_num_thens = thens.iter().all(|t| then_as_f64(t).is_some());
    if all_num_thens && default.is_numeric() {
        let thens = thens.iter().map(|t| then_as_f64(t).unwrap()).collect();
        return Ok(Expression::NumLookup(Box::new(NumLookupExpr {
            key,
            op,
            values,
            thens,
            default,
        })));
    }

    Ok(Expression::Lookup(Box::new(LookupExpr {
        key,
        op,
        values,
        thens,
        default,
    })))
}

fn then_value(doc: &Doc, row: &Doc) -> Result<Value, CompileError> {
    match doc {
        Doc::Number(n) => Ok(Value::Num(n.as_f64().unwrap_or(0.0))),
        Doc::String(s) => Ok(Value::Str(s.clone())),
        Doc::Bool(b) => Ok(Value::Bool(*b)),
        _ => Err(CompileError::new("lookup: value must be a scalar", row)),
    }
}

fn then_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Num(n) => Some(*n),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::expression::compile_expression as compile_raw;
    use crate::osm::{tags, FeatureId};
    use geo_types::{Geometry, Point};
    use std::sync::Arc;

    fn compile(doc: &str) -> Expression {
        compile_raw(&serde_yaml::from_str(doc).unwrap()).unwrap()
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
    fn numeric_promotion_and_gte_scan() {
        let expr = compile(
            "{lookup: {key: 10, op: '>=', table: [[8, 20], [9, 10], [10, 5]], default: 13}}",
        );
        assert!(matches!(expr, Expression::NumLookup(_)));
        // the second row's threshold (10) is the first the key meets
        assert_eq!(expr.eval_num(&mut ctx(&[])), 9.0);
    }

    #[test]
    fn falls_back_to_default() {
        let expr = compile(
            "{lookup: {key: 1, op: '>=', table: [[8, 20], [9, 10]], default: 13}}",
        );
        assert_eq!(expr.eval_num(&mut ctx(&[])), 13.0);
    }

    #[test]
    fn generic_when_thens_not_numeric() {
        let expr = compile(
            "{lookup: {key: 3, op: '<=', table: [[small, 5], [big, 100]], default: huge}}",
        );
        assert!(matches!(expr, Expression::Lookup(_)));
        assert_eq!(
            expr.eval(&mut ctx(&[])),
            Some(Value::Str("small".into()))
        );
    }

    #[test]
    fn promoted_matches_generic() {
        // identical tables, one with numeric thens as strings (still
        // promotable) checked against plain numbers
        let promoted = compile(
            "{lookup: {key: 9, op: '<=', table: [['8', 8], ['9', 9]], default: 99}}",
        );
        let generic = compile(
            "{lookup: {key: 9, op: '<=', table: [[low, 8], [mid, 9]], default: hi}}",
        );
        assert!(matches!(promoted, Expression::NumLookup(_)));
        assert_eq!(promoted.eval_num(&mut ctx(&[])), 9.0);
        assert_eq!(
            generic.eval(&mut ctx(&[])),
            Some(Value::Str("mid".into()))
        );
    }

    #[test]
    fn missing_default_is_an_error() {
        let doc: Doc =
            serde_yaml::from_str("{lookup: {key: 1, op: '>=', table: [[1, 2]]}}").unwrap();
        assert!(compile_lookup_expr(&doc).is_err());
    }

    #[test]
    fn bad_op_is_an_error() {
        let doc: Doc =
            serde_yaml::from_str("{lookup: {key: 1, op: '==', table: [[1, 2]], default: 0}}")
                .unwrap();
        assert!(compile_lookup_expr(&doc).is_err());
    }
}
