//! Number and unit parsing for raw tag values.

use std::sync::LazyLock;

use regex::Regex;

static FEET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([+-]?[0-9.]+)'(?: *([+-]?[0-9.]+)")?"#).unwrap());
static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([+-]?[0-9.]+)").unwrap());
static UNIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([+-]?[0-9.]+) *(mi|km|m|nmi|ft)").unwrap());

const METERS_PER_INCH: f64 = 0.0254;

// Keep in sync with UNIT_PATTERN.
fn unit_factor(unit: &str) -> f64 {
    match unit {
        "mi" => 1609.3440,
        "km" => 1000.0,
        "m" => 1.0,
        "nmi" => 1852.0,
        "ft" => 0.3048,
        _ => 0.0,
    }
}

/// Parse a plain decimal number, ignoring surrounding whitespace.
pub fn to_f64(x: &str) -> Option<f64> {
    x.trim().parse::<f64>().ok()
}

/// Parse a tag value like `12`, `1.5mi` or `10' 6"` into meters.
pub fn to_f64_meters(x: &str) -> Option<f64> {
    let x = x.trim();
    if x.is_empty() {
        return None;
    }

    if let Some(v) = to_f64(x) {
        return Some(v);
    }

    if let Some(m) = UNIT_PATTERN.captures(x) {
        if let Some(val) = to_f64(&m[1]) {
            return Some(val * unit_factor(&m[2]));
        }
    }

    if let Some(m) = FEET_PATTERN.captures(x) {
        let feet = m.get(1).and_then(|v| to_f64(v.as_str()));
        let inches = m.get(2).and_then(|v| to_f64(v.as_str()));
        if feet.is_some() || inches.is_some() {
            let total = inches.unwrap_or(0.0) + feet.unwrap_or(0.0) * 12.0;
            return Some(total * METERS_PER_INCH);
        }
    }

    // Fall back to the first parseable number in the string.
    NUMBER_PATTERN
        .find_iter(x)
        .take(5)
        .find_map(|m| to_f64(m.as_str()))
}

/// Format a value with at most one decimal place, trimming `.0`.
pub fn one_decimal_point(val: f64) -> String {
    let s = format!("{val:.1}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}
