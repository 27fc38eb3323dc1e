//! CSV rule tables mapping feature properties (plus the tile zoom) to a
//! single output value, evaluated top-down with first match winning.

use crate::feature::Feature;
use crate::filter::CompileError;
use crate::value::Value;

/// A compiled spreadsheet of conditions, e.g. for `scale_rank` or
/// `sort_rank`. The last CSV column is the output property; every other
/// column header names a feature property (`zoom` is the tile zoom).
#[derive(Debug)]
pub struct Matcher {
    output_key: String,
    properties: Vec<String>,
    rows: Vec<Row>,
}

/// Request-level inputs shared by all matches.
pub struct MatchContext {
    pub zoom: f64,
}

impl Matcher {
    /// Load a matcher from CSV bytes.
    pub fn load(data: &[u8]) -> Result<Matcher, CompileError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(data);

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result
                .map_err(|e| CompileError::msg(format!("matcher: csv parse: {e}")))?;
            records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        if records.is_empty() {
            return Err(CompileError::msg("matcher: empty csv"));
        }

        let headers = records.remove(0);
        Matcher::compile(&headers, &records)
    }

    /// Compile headers and rows into a matcher.
    pub fn compile(headers: &[String], rows: &[Vec<String>]) -> Result<Matcher, CompileError> {
        if headers.len() < 2 {
            return Err(CompileError::msg("matcher: need at least two columns"));
        }

        let output_key = headers[headers.len() - 1].clone();
        let properties = headers[..headers.len() - 1]
            .iter()
            // headers may carry a type hint suffix, e.g. "area::number"
            .map(|h| h.split("::").next().unwrap_or(h).to_string())
            .collect();

        let rows = rows
            .iter()
            .map(|r| Row::compile(r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Matcher { output_key, properties, rows })
    }

    /// Evaluate the table against one feature; on the first matching row,
    /// write the output property and return true.
    pub fn eval(&self, ctx: &MatchContext, feature: &mut Feature) -> bool {
        let zoom = Value::Num(ctx.zoom);
        let resolved: Vec<Option<&Value>> = self
            .properties
            .iter()
            .map(|p| {
                if p == "zoom" {
                    Some(&zoom)
                } else {
                    feature.properties.get(p)
                }
            })
            .collect();

        let matched = self.rows.iter().find_map(|row| row.eval(&resolved));
        drop(resolved);

        match matched {
            Some(value) => {
                feature.properties.insert(self.output_key.clone(), value);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct Row {
    value: f64,
    cells: Vec<Cell>,
}

impl Row {
    fn compile(columns: &[String]) -> Result<Row, CompileError> {
        if columns.len() < 2 {
            return Err(CompileError::msg("matcher: need at least two columns"));
        }

        let value = columns[columns.len() - 1]
            .parse::<f64>()
            .map_err(|e| CompileError::msg(format!("matcher: bad output value: {e}")))?;

        let cells = columns[..columns.len() - 1]
            .iter()
            .map(|c| Cell::compile(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Row { value, cells })
    }

    fn eval(&self, props: &[Option<&Value>]) -> Option<f64> {
        for (cell, prop) in self.cells.iter().zip(props) {
            if !cell.eval(*prop) {
                return None;
            }
        }

        Some(self.value)
    }
}

#[derive(Debug)]
enum Cell {
    /// `*`: anything, present or not
    Any,
    /// `-`: property absent
    Absent,
    /// `+`: property present
    Present,
    /// `true`: boolean true
    True,
    /// `a;b;c`: string in set
    Set(Vec<String>),
    Gte(f64),
    Gt(f64),
    Lte(f64),
    Lt(f64),
    /// literal number; also matches its string form
    ExactNum(f64, String),
    Exact(String),
}

impl Cell {
    fn compile(c: &str) -> Result<Cell, CompileError> {
        let cell = match c {
            "*" => Cell::Any,
            "-" => Cell::Absent,
            "+" => Cell::Present,
            "true" => Cell::True,
            _ if c.contains(';') => Cell::Set(c.split(';').map(str::to_string).collect()),
            _ if c.starts_with(">=") => Cell::Gte(parse_threshold(&c[2..], c)?),
            _ if c.starts_with("<=") => Cell::Lte(parse_threshold(&c[2..], c)?),
            _ if c.starts_with('>') => Cell::Gt(parse_threshold(&c[1..], c)?),
            _ if c.starts_with('<') => Cell::Lt(parse_threshold(&c[1..], c)?),
            _ if c.starts_with('!') => {
                return Err(CompileError::msg(format!("matcher: invalid cell: {c}")))
            }
            _ => match c.parse::<f64>() {
                Ok(f) => Cell::ExactNum(f, c.to_string()),
                Err(_) => Cell::Exact(c.to_string()),
            },
        };

        Ok(cell)
    }

    fn eval(&self, val: Option<&Value>) -> bool {
        match self {
            Cell::Any => true,
            Cell::Absent => val.is_none(),
            Cell::Present => val.is_some(),
            Cell::True => matches!(val, Some(Value::Bool(true))),
            Cell::Set(set) => match val.and_then(|v| v.as_str()) {
                Some(s) => set.iter().any(|v| v == s),
                None => false,
            },
            Cell::Gte(t) => val.and_then(Value::as_num).is_some_and(|v| v >= *t),
            Cell::Gt(t) => val.and_then(Value::as_num).is_some_and(|v| v > *t),
            Cell::Lte(t) => val.and_then(Value::as_num).is_some_and(|v| v <= *t),
            Cell::Lt(t) => val.and_then(Value::as_num).is_some_and(|v| v < *t),
            Cell::ExactNum(f, s) => match val {
                Some(Value::Num(v)) => v == f,
                Some(Value::Str(v)) => v == s,
                _ => false,
            },
            Cell::Exact(s) => val.and_then(|v| v.as_str()) == Some(s),
        }
    }
}

fn parse_threshold(s: &str, cell: &str) -> Result<f64, CompileError> {
    s.parse::<f64>()
        .map_err(|_| CompileError::msg(format!("matcher: invalid cell: {cell}")))
}
