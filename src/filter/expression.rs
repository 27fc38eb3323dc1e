//! Expressions compiled from rule documents.
//!
//! Expressions evaluate to a dynamic [`Value`] or to nothing. Expressions
//! that are statically known to be numeric also expose `eval_num`, a direct
//! `f64` path with no boxing; `case` and `lookup` are promoted to numeric
//! variants at compile time when all their arms are numeric.

use serde_yaml::Value as Doc;

use super::condition::{compile_condition, Condition};
use super::error::{type_name, CompileError};
use super::functions::{compile_call_expr, ColExpr, FuncExpr};
use super::lookup::{compile_lookup_expr, LookupExpr, NumLookupExpr};
use super::Context;
use crate::value::Value;

/// Reserved tokens we have replaced with a different expression; ignored so
/// older rule bundles keep compiling.
const IGNORED_EXPRESSIONS: &[&str] = &["expr"];

#[derive(Debug, Clone)]
pub enum Expression {
    Nil,
    Num(f64),
    Str(String),
    Bool(bool),
    Col(ColExpr),
    Func(FuncExpr),
    Case(CaseExpr),
    NumCase(NumCaseExpr),
    Clamp(Box<ClampExpr>),
    Min(Vec<Expression>),
    Max(Vec<Expression>),
    Sum(Vec<Expression>),
    Mul(Vec<Expression>),
    /// Boolean-guarded pass-through: true when the condition holds, nil
    /// otherwise.
    Cond(Box<Condition>),
    Lookup(Box<LookupExpr>),
    NumLookup(Box<NumLookupExpr>),
}

#[derive(Debug, Clone)]
pub struct CaseExpr {
    pub whens: Vec<Condition>,
    pub thens: Vec<Expression>,
    pub else_: Option<Box<Expression>>,
}

#[derive(Debug, Clone)]
pub struct NumCaseExpr {
    pub whens: Vec<Condition>,
    pub thens: Vec<Expression>,
    pub else_: Option<Box<Expression>>,
}

#[derive(Debug, Clone)]
pub struct ClampExpr {
    pub min: Expression,
    pub max: Expression,
    pub value: Expression,
}

impl Expression {
    pub fn eval(&self, ctx: &mut Context) -> Option<Value> {
        match self {
            Expression::Nil => None,
            Expression::Num(v) => Some(Value::Num(*v)),
            Expression::Str(s) => Some(Value::Str(s.clone())),
            Expression::Bool(b) => Some(Value::Bool(*b)),
            Expression::Col(c) => c.eval(ctx),
            Expression::Func(f) => f.eval(ctx),
            Expression::Case(c) => c.eval(ctx),
            Expression::NumCase(c) => Some(Value::Num(c.eval_num(ctx))),
            Expression::Clamp(c) => Some(Value::Num(c.eval_num(ctx))),
            Expression::Min(_)
            | Expression::Max(_)
            | Expression::Sum(_)
            | Expression::Mul(_) => Some(Value::Num(self.eval_num(ctx))),
            Expression::Cond(c) => c.eval(ctx).then_some(Value::Bool(true)),
            Expression::Lookup(l) => l.eval(ctx),
            Expression::NumLookup(l) => Some(Value::Num(l.eval_num(ctx))),
        }
    }

    /// Direct numeric evaluation. Only called on expressions for which
    /// [`Expression::is_numeric`] holds; the compiler guarantees this.
    pub fn eval_num(&self, ctx: &mut Context) -> f64 {
        match self {
            Expression::Num(v) => *v,
            Expression::Col(c) => c.eval_num(ctx),
            Expression::Func(f) => f.eval_num(ctx),
            Expression::NumCase(c) => c.eval_num(ctx),
            Expression::Clamp(c) => c.eval_num(ctx),
            Expression::Min(es) => es
                .iter()
                .map(|e| e.eval_num(ctx))
                .fold(f64::MAX, f64::min),
            Expression::Max(es) => es
                .iter()
                .map(|e| e.eval_num(ctx))
                .fold(f64::MIN, f64::max),
            Expression::Sum(es) => es.iter().map(|e| e.eval_num(ctx)).sum(),
            Expression::Mul(es) => es.iter().map(|e| e.eval_num(ctx)).product(),
            Expression::NumLookup(l) => l.eval_num(ctx),
            other => panic!("expression is not numeric: {other:?}"),
        }
    }

    /// Statically numeric, i.e. `eval_num` is available.
    pub fn is_numeric(&self) -> bool {
        match self {
            Expression::Num(_)
            | Expression::NumCase(_)
            | Expression::Clamp(_)
            | Expression::Min(_)
            | Expression::Max(_)
            | Expression::Sum(_)
            | Expression::Mul(_)
            | Expression::NumLookup(_) => true,
            Expression::Col(c) => c.is_numeric(),
            Expression::Func(f) => f.is_numeric(),
            _ => false,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Expression::Nil)
    }
}

impl CaseExpr {
    fn eval(&self, ctx: &mut Context) -> Option<Value> {
        let mut result = None;
        let mut found = false;

        for (when, then) in self.whens.iter().zip(&self.thens) {
            if when.eval(ctx) {
                let v = then.eval(ctx);
                if !found {
                    result = v;
                    found = true;
                }
                if !ctx.debug {
                    return result;
                }
            }
        }

        if let Some(else_) = &self.else_ {
            if !found {
                return else_.eval(ctx);
            } else if ctx.debug {
                else_.eval(ctx);
            }
        }

        result
    }
}

impl NumCaseExpr {
    fn eval_num(&self, ctx: &mut Context) -> f64 {
        let mut result = 0.0;
        let mut found = false;

        for (when, then) in self.whens.iter().zip(&self.thens) {
            if when.eval(ctx) {
                let v = then.eval_num(ctx);
                if !found {
                    result = v;
                    found = true;
                }
                if !ctx.debug {
                    return result;
                }
            }
        }

        if let Some(else_) = &self.else_ {
            if !found {
                return else_.eval_num(ctx);
            } else if ctx.debug {
                else_.eval_num(ctx);
            }
        }

        if found {
            return result;
        }

        panic!("case: did not match any condition and has no else");
    }
}

impl ClampExpr {
    fn eval_num(&self, ctx: &mut Context) -> f64 {
        let val = self.value.eval_num(ctx);

        let min = self.min.eval_num(ctx);
        if val < min {
            return min;
        }

        let max = self.max.eval_num(ctx);
        if val > max {
            return max;
        }

        val
    }
}

/// Compile a parsed rule document into an expression.
pub fn compile_expression(doc: &Doc) -> Result<Expression, CompileError> {
    match doc {
        Doc::Null => Ok(Expression::Nil),
        Doc::Number(n) => Ok(Expression::Num(n.as_f64().unwrap_or(0.0))),
        Doc::Bool(b) => Ok(Expression::Bool(*b)),
        Doc::String(s) => {
            if s.is_empty() {
                Ok(Expression::Nil)
            } else {
                Ok(Expression::Str(s.clone()))
            }
        }
        Doc::Mapping(map) => {
            let entries: Vec<(&Doc, &Doc)> = map
                .iter()
                .filter(|(k, _)| {
                    !matches!(k.as_str(), Some(key) if IGNORED_EXPRESSIONS.contains(&key))
                })
                .collect();

            if entries.len() != 1 {
                return Err(CompileError::new("multiple properties", doc));
            }

            let (k, v) = entries[0];
            let key = k
                .as_str()
                .ok_or_else(|| CompileError::new("key must be a string", doc))?;

            match key {
                "col" => compile_col(v),
                "call" => compile_call(v),
                "case" => compile_case(v),
                "clamp" => compile_clamp(v),
                "lookup" => compile_lookup_expr(v),
                "min" => Ok(Expression::Min(compile_num_list(v).map_err(|e| e.context("min"))?)),
                "max" => Ok(Expression::Max(compile_num_list(v).map_err(|e| e.context("max"))?)),
                "sum" => Ok(Expression::Sum(compile_num_list(v).map_err(|e| e.context("sum"))?)),
                "mul" => Ok(Expression::Mul(compile_num_list(v).map_err(|e| e.context("mul"))?)),
                "cond" => Ok(Expression::Cond(Box::new(
                    compile_condition(v).map_err(|e| e.context("cond"))?,
                ))),
                other => Err(CompileError::new(format!("unsupported type: {other}"), doc)),
            }
        }
        other => Err(CompileError::new(
            format!("unsupported type: {}", type_name(other)),
            doc,
        )),
    }
}

/// Compile a document into an expression that is statically numeric.
pub fn compile_num_expression(doc: &Doc) -> Result<Expression, CompileError> {
    let expr = compile_expression(doc)?;
    if expr.is_numeric() {
        Ok(expr)
    } else {
        Err(CompileError::new("not numeric", doc))
    }
}

fn compile_col(doc: &Doc) -> Result<Expression, CompileError> {
    let name = doc
        .as_str()
        .ok_or_else(|| CompileError::new("col: value must be string", doc))?;
    ColExpr::compile(name, doc)
}

fn compile_call(doc: &Doc) -> Result<Expression, CompileError> {
    let map = doc.as_mapping().ok_or_else(|| {
        CompileError::new("call: must be a hash (eg. { func:, args: [] })", doc)
    })?;

    let name = map
        .get("func")
        .and_then(Doc::as_str)
        .ok_or_else(|| CompileError::new("call: function name not a string", doc))?;

    let raw_args = map
        .get("args")
        .and_then(Doc::as_sequence)
        .ok_or_else(|| CompileError::new("call: args are not an array", doc))?;

    let args = raw_args
        .iter()
        .map(compile_expression)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.context("call"))?;

    compile_call_expr(name, args, doc)
}

fn compile_case(doc: &Doc) -> Result<Expression, CompileError> {
    let cases = doc
        .as_sequence()
        .ok_or_else(|| CompileError::new("case: must be array of { when:, then: }", doc))?;

    let mut whens = Vec::with_capacity(cases.len());
    let mut thens = Vec::with_capacity(cases.len());
    let mut else_: Option<Box<Expression>> = None;
    let mut is_num = true;

    for case in cases {
        let map = case.as_mapping().ok_or_else(|| {
            CompileError::new("case: condition must be of the form { when:, then: }", case)
        })?;

        let when = map.get("when");
        let then = map.get("then");
        let els = map.get("else");

        if let Some(els) = els {
            if when.is_some() || then.is_some() {
                return Err(CompileError::new(
                    "case: else may not be combined with when/then",
                    case,
                ));
            }

            let e = compile_expression(els).map_err(|e| e.context("case: else"))?;
            is_num = is_num && e.is_numeric();
            else_ = Some(Box::new(e));
            continue;
        }

        let Some(when) = when else {
            return Err(CompileError::new(
                "case: condition must be of the form { when:, then: }",
                case,
            ));
        };

        whens.push(compile_condition(when).map_err(|e| e.context("case: when"))?);

        match then {
            None => {
                thens.push(Expression::Nil);
                is_num = false;
            }
            Some(then) => {
                let t = compile_expression(then).map_err(|e| e.context("case: then"))?;
                is_num = is_num && t.is_numeric();
                thens.push(t);
            }
        }
    }

    // All-numeric arms avoid boxing on the hot path.
    if is_num {
        return Ok(Expression::NumCase(NumCaseExpr { whens, thens, else_ }));
    }

    Ok(Expression::Case(CaseExpr { whens, thens, else_ }))
}

fn compile_clamp(doc: &Doc) -> Result<Expression, CompileError> {
    let map = doc.as_mapping().ok_or_else(|| {
        CompileError::new("clamp: must be hash of the form { min:, max:, value: }", doc)
    })?;

    let (Some(min), Some(max), Some(value)) =
        (map.get("min"), map.get("max"), map.get("value"))
    else {
        return Err(CompileError::new(
            "clamp: must be hash of the form { min:, max:, value: }",
            doc,
        ));
    };

    Ok(Expression::Clamp(Box::new(ClampExpr {
        min: compile_num_expression(min).map_err(|e| e.context("clamp: min"))?,
        max: compile_num_expression(max).map_err(|e| e.context("clamp: max"))?,
        value: compile_num_expression(value).map_err(|e| e.context("clamp: value"))?,
    })))
}

fn compile_num_list(doc: &Doc) -> Result<Vec<Expression>, CompileError> {
    let seq = match doc.as_sequence() {
        Some(seq) if !seq.is_empty() => seq,
        _ => return Err(CompileError::new("must be array of numbers", doc)),
    };

    seq.iter().map(compile_num_expression).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{tags, FeatureId};
    use geo_types::{Geometry, Point};
    use std::sync::Arc;

    fn compile(doc: &str) -> Expression {
        compile_expression(&serde_yaml::from_str(doc).unwrap()).unwrap()
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
    fn literals() {
        assert!(matches!(compile("12"), Expression::Num(v) if v == 12.0));
        assert!(matches!(compile("'hello'"), Expression::Str(_)));
        assert!(matches!(compile("true"), Expression::Bool(true)));
        assert!(compile("''").is_nil());
        assert!(compile("null").is_nil());
    }

    #[test]
    fn col_fetches_tag() {
        let expr = compile("{col: 'roof:color'}");
        assert_eq!(
            expr.eval(&mut ctx(&[("roof:color", "red")])),
            Some(Value::Str("red".into()))
        );
        assert_eq!(expr.eval(&mut ctx(&[])), None);
    }

    #[test]
    fn col_strips_tags_prefix() {
        let expr = compile("{col: 'tags->location'}");
        assert_eq!(
            expr.eval(&mut ctx(&[("location", "roof")])),
            Some(Value::Str("roof".into()))
        );
    }

    #[test]
    fn unknown_mz_column_fails_compile() {
        let doc: Doc = serde_yaml::from_str("{col: mz_brand_new_thing}").unwrap();
        assert!(compile_expression(&doc).is_err());
    }

    #[test]
    fn case_generic() {
        let expr = compile(
            "{case: [{when: {highway: primary}, then: major}, {else: minor}]}",
        );
        assert!(matches!(expr, Expression::Case(_)));
        assert_eq!(
            expr.eval(&mut ctx(&[("highway", "primary")])),
            Some(Value::Str("major".into()))
        );
        assert_eq!(
            expr.eval(&mut ctx(&[("highway", "service")])),
            Some(Value::Str("minor".into()))
        );
    }

    #[test]
    fn case_without_else_yields_nil() {
        let expr = compile("{case: [{when: {highway: primary}, then: major}]}");
        assert_eq!(expr.eval(&mut ctx(&[])), None);
    }

    #[test]
    fn case_promotes_to_numeric() {
        let expr = compile("{case: [{when: {highway: primary}, then: 8}, {else: 11}]}");
        assert!(matches!(expr, Expression::NumCase(_)));
        assert_eq!(expr.eval_num(&mut ctx(&[("highway", "primary")])), 8.0);
        assert_eq!(expr.eval_num(&mut ctx(&[])), 11.0);
    }

    #[test]
    fn promoted_case_matches_generic_results() {
        let num = compile("{case: [{when: {highway: primary}, then: 8}, {else: 11}]}");
        // same document but with a string arm added so it stays generic
        let gen = compile(
            "{case: [{when: {highway: primary}, then: 8}, {when: {x: y}, then: s}, {else: 11}]}",
        );
        for tags in [&[("highway", "primary")][..], &[][..]] {
            assert_eq!(num.eval(&mut ctx(tags)), gen.eval(&mut ctx(tags)));
        }
    }

    #[test]
    fn clamp_orders() {
        let expr = compile("{clamp: {min: 13, max: 16, value: 20}}");
        assert_eq!(expr.eval_num(&mut ctx(&[])), 16.0);
        let expr = compile("{clamp: {min: 13, max: 16, value: 2}}");
        assert_eq!(expr.eval_num(&mut ctx(&[])), 13.0);
        let expr = compile("{clamp: {min: 13, max: 16, value: 14.5}}");
        assert_eq!(expr.eval_num(&mut ctx(&[])), 14.5);
    }

    #[test]
    fn min_max_sum_mul() {
        assert_eq!(compile("{min: [3, 5, 1]}").eval_num(&mut ctx(&[])), 1.0);
        assert_eq!(compile("{max: [3, 5, 1]}").eval_num(&mut ctx(&[])), 5.0);
        assert_eq!(compile("{sum: [3, 5, 1]}").eval_num(&mut ctx(&[])), 9.0);
        assert_eq!(compile("{mul: [3, 5, 2]}").eval_num(&mut ctx(&[])), 30.0);
    }

    #[test]
    fn cond_passthrough() {
        let expr = compile("{cond: {highway: primary}}");
        assert_eq!(
            expr.eval(&mut ctx(&[("highway", "primary")])),
            Some(Value::Bool(true))
        );
        assert_eq!(expr.eval(&mut ctx(&[])), None);
    }

    #[test]
    fn num_expression_rejects_strings() {
        let doc: Doc = serde_yaml::from_str("{col: name}").unwrap();
        assert!(compile_num_expression(&doc).is_err());
    }

    #[test]
    fn debug_case_evaluates_all_arms_same_result() {
        let expr = compile(
            "{case: [{when: {a: '1'}, then: first}, {when: {b: '2'}, then: second}, {else: last}]}",
        );
        let mut c = ctx(&[("a", "1"), ("b", "2")]);
        let normal = expr.eval(&mut c);
        c.debug = true;
        assert_eq!(expr.eval(&mut c), normal);
    }
}
