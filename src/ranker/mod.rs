//! Collision ranking: a layered YAML table assigning a dense integer rank
//! to label-bearing features, with reserved index ranges.

use std::collections::HashMap;

use serde_yaml::Value as Doc;

use crate::filter::CompileError;
use crate::value::{Properties, Value};

/// A compiled collision rank table.
#[derive(Debug)]
pub struct Ranker {
    /// Matchers hashed by layer then kind; entries with no kind are
    /// indexed under "".
    matchers: HashMap<String, HashMap<String, Vec<Matcher>>>,
    catch_all: i64,
}

#[derive(Debug)]
struct Matcher {
    cond: Option<Condition>,
    rank: i64,
}

impl Ranker {
    /// Parse the YAML rank table. Entries are matched in document order;
    /// `_reserved` blocks advance (or jump) the running index.
    pub fn load(data: &[u8]) -> Result<Ranker, CompileError> {
        let ranks: Doc = serde_yaml::from_slice(data)
            .map_err(|e| CompileError::msg(format!("ranker: yaml parse: {e}")))?;
        let ranks = ranks
            .as_sequence()
            .ok_or_else(|| CompileError::new("ranker: document must be a sequence", &ranks))?;

        let mut ranker = Ranker {
            matchers: HashMap::new(),
            catch_all: 0,
        };

        let mut index: i64 = 1;
        for rank in ranks {
            let map = rank
                .as_mapping()
                .ok_or_else(|| CompileError::new("ranker: entry must be a mapping", rank))?;

            if let Some(reserved) = map.get("_reserved") {
                let reserved = reserved.as_mapping().ok_or_else(|| {
                    CompileError::new("ranker: _reserved must be a mapping", rank)
                })?;

                if let Some(count) = reserved.get("count").and_then(Doc::as_i64) {
                    index += count;
                    continue;
                }

                let (Some(from), Some(to)) = (
                    reserved.get("from").and_then(Doc::as_i64),
                    reserved.get("to").and_then(Doc::as_i64),
                ) else {
                    return Err(CompileError::new(
                        "ranker: reserved from and to values must be integers",
                        rank,
                    ));
                };

                if from < index {
                    return Err(CompileError::new(
                        format!("ranker: index {index} already used, wanted to reserve from {from}"),
                        rank,
                    ));
                }

                index = to + 1;
                continue;
            }

            let layer = match map.get("$layer") {
                Some(Doc::String(s)) => s.clone(),
                Some(Doc::Bool(true)) => {
                    // the catch-all terminates the table
                    ranker.catch_all = index;
                    break;
                }
                _ => {
                    return Err(CompileError::new(
                        "ranker: $layer required and must be a string",
                        rank,
                    ))
                }
            };

            let kind = map
                .get("kind")
                .and_then(Doc::as_str)
                .unwrap_or("")
                .to_string();

            let matcher = make_matcher(map, index, rank)?;
            ranker
                .matchers
                .entry(layer)
                .or_default()
                .entry(kind)
                .or_default()
                .push(matcher);
            index += 1;
        }

        Ok(ranker)
    }

    /// Rank for the feature's properties in the given layer.
    pub fn rank(&self, layer_name: &str, props: &Properties) -> i64 {
        let Some(layer) = self.matchers.get(layer_name) else {
            return self.catch_all;
        };

        let kind = props.str_or("kind", "");
        let Some(by_kind) = layer.get(kind) else {
            return self.catch_all;
        };

        // matchers with no kind apply after the kind-specific ones
        let no_kind = layer.get("");
        let candidates = by_kind.iter().chain(no_kind.into_iter().flatten());

        for m in candidates {
            if m.matches(props) {
                return m.rank;
            }
        }

        self.catch_all
    }
}

impl Matcher {
    fn matches(&self, props: &Properties) -> bool {
        match &self.cond {
            None => true,
            Some(cond) => cond.eval(props),
        }
    }
}

/// Property matchers beyond `$layer`/`kind`: plain keys are equality
/// checks, `not` negates a nested matcher.
#[derive(Debug)]
enum Condition {
    All(Vec<Condition>),
    Not(Box<Condition>),
    Eq { key: String, val: Value },
}

impl Condition {
    fn eval(&self, props: &Properties) -> bool {
        match self {
            Condition::All(conds) => conds.iter().all(|c| c.eval(props)),
            Condition::Not(inner) => !inner.eval(props),
            Condition::Eq { key, val } => props.get(key) == Some(val),
        }
    }
}

fn make_matcher(
    map: &serde_yaml::Mapping,
    rank: i64,
    doc: &Doc,
) -> Result<Matcher, CompileError> {
    let mut conds = Vec::new();
    for (k, v) in map {
        let key = k
            .as_str()
            .ok_or_else(|| CompileError::new("ranker: keys must be strings", doc))?;
        if key == "$layer" || key == "kind" {
            continue;
        }

        conds.push(compile_condition(key, v, doc)?);
    }

    let cond = match conds.len() {
        0 => None,
        1 => Some(conds.pop().unwrap()),
        _ => Some(Condition::All(conds)),
    };

    Ok(Matcher { cond, rank })
}

fn compile_condition(key: &str, val: &Doc, doc: &Doc) -> Result<Condition, CompileError> {
    if key == "not" {
        let map = val
            .as_mapping()
            .ok_or_else(|| CompileError::new("ranker: not must be a mapping", doc))?;
        let mut conds = Vec::new();
        for (k, v) in map {
            let key = k
                .as_str()
                .ok_or_else(|| CompileError::new("ranker: keys must be strings", doc))?;
            conds.push(compile_condition(key, v, doc)?);
        }
        let inner = match conds.len() {
            1 => conds.pop().unwrap(),
            _ => Condition::All(conds),
        };
        return Ok(Condition::Not(Box::new(inner)));
    }

    let val = match val {
        Doc::String(s) => Value::Str(s.clone()),
        Doc::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
        Doc::Bool(b) => Value::Bool(*b),
        other => {
            return Err(CompileError::new(
                format!("ranker: key {key} has unsupported value type"),
                other,
            ))
        }
    };

    Ok(Condition::Eq { key: key.to_string(), val })
}
