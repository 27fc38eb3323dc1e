//! Route network extraction: regroup relation-derived (route, network, ref)
//! triples per network family, compute shield text, and pick the most
//! important network per family.

use std::sync::LazyLock;

use regex::Regex;

use crate::feature::Feature;
use crate::value::Value;

/// A family of route networks. `prefix` is inserted into the property
/// names we write (e.g. `bicycle_` for `bicycle_network`); `shield_text`
/// extracts the text drawn in a highway shield; `importance` scores a
/// (network, ref) pair, lower being more important.
struct NetworkFamily {
    prefix: &'static str,
    shield_text: fn(&str, &str) -> String,
    importance: fn(&str, &str) -> i64,
}

static ROAD: NetworkFamily = NetworkFamily {
    prefix: "",
    shield_text: road_shield_text,
    importance: road_network_importance,
};

static WALKING: NetworkFamily = NetworkFamily {
    prefix: "walking_",
    shield_text: default_shield_text,
    importance: walking_network_importance,
};

static BICYCLE: NetworkFamily = NetworkFamily {
    prefix: "bicycle_",
    shield_text: default_shield_text,
    importance: bicycle_network_importance,
};

static BUS: NetworkFamily = NetworkFamily {
    prefix: "bus_",
    shield_text: default_shield_text,
    importance: bus_network_importance,
};

/// Fixed iteration order keeps output deterministic.
static FAMILIES: [&NetworkFamily; 4] = [&ROAD, &WALKING, &BICYCLE, &BUS];

fn family_for_route(route: &str) -> Option<&'static NetworkFamily> {
    match route {
        "road" => Some(&ROAD),
        "foot" | "hiking" => Some(&WALKING),
        "bicycle" => Some(&BICYCLE),
        "bus" | "trolleybus" => Some(&BUS),
        _ => None,
    }
}

/// Best guess of the route type from the network tag itself. Bus routes
/// can't be told apart from road routes by tag alone, but bus routes are
/// relations where a route type is given, so default to road.
fn guess_type_from_network(network: &str) -> &'static str {
    match network {
        "iwn" | "nwn" | "rwn" | "lwn" => "hiking",
        "icn" | "ncn" | "rcn" | "lcn" => "bicycle",
        _ => "road",
    }
}

/// Operators whose road networks are recognisable when the `network` tag
/// itself is missing.
fn network_for_operator(operator: &str) -> Option<&'static str> {
    match operator {
        "Ohio Department of Transportation" => Some("US:OH"),
        "New York State Department of Transportation" => Some("US:NY"),
        "Texas Department of Transportation" => Some("US:TX"),
        "Florida Department of Transportation" => Some("US:FL"),
        "Ontario Ministry of Transportation" => Some("CA:ON"),
        "Autostrade per l'Italia S.p.A." => Some("IT:A"),
        _ => None,
    }
}

/// Move the feature's own `network`/`ref` tags into the `mz_networks`
/// triple list so networks from tags and from relations are handled the
/// same way downstream.
pub fn merge_networks_from_tags(feature: &mut Feature) {
    let mut network = feature.properties.str_or("network", "").to_string();
    let reference = feature.properties.str_or("ref", "").to_string();

    if network.is_empty() {
        let operator = feature.properties.str_or("operator", "");
        if let Some(mapped) = network_for_operator(operator) {
            network = mapped.to_string();
        }
    }

    if network.is_empty() || reference.is_empty() {
        return;
    }

    feature.properties.remove("network");
    feature.properties.remove("ref");

    let mut list = match feature.properties.remove("mz_networks") {
        Some(Value::List(list)) => list,
        _ => Vec::new(),
    };
    list.push(guess_type_from_network(&network).to_string());
    list.push(network);
    list.push(reference);
    feature.properties.insert("mz_networks", list);
}

/// Consume the flat `mz_networks` triples and regroup them per family into
/// `all_<prefix>networks` and `all_<prefix>shield_texts`.
pub fn extract_network_information(feature: &mut Feature) {
    let triples = match feature.properties.remove("mz_networks") {
        Some(Value::List(list)) => list,
        _ => return,
    };
    if triples.is_empty() {
        return;
    }

    for family in FAMILIES {
        let mut networks = Vec::new();
        let mut shields = Vec::new();

        for triple in triples.chunks_exact(3) {
            let matched = match family_for_route(&triple[0]) {
                Some(f) => std::ptr::eq(f, family),
                None => false,
            };
            if matched {
                networks.push(triple[1].clone());
                shields.push((family.shield_text)(&triple[1], &triple[2]));
            }
        }

        if networks.is_empty() {
            continue;
        }

        feature
            .properties
            .insert(format!("all_{}networks", family.prefix), networks);
        feature
            .properties
            .insert(format!("all_{}shield_texts", family.prefix), shields);
    }
}

/// For each family, sort its networks by importance and publish the most
/// important as `<prefix>network` / `<prefix>shield_text`, keeping the
/// sorted lists.
pub fn choose_most_important_network(feature: &mut Feature) {
    for family in FAMILIES {
        let all_networks = format!("all_{}networks", family.prefix);
        let all_shields = format!("all_{}shield_texts", family.prefix);

        let networks = match feature.properties.remove(&all_networks) {
            Some(Value::List(list)) => list,
            _ => Vec::new(),
        };
        let shields = match feature.properties.remove(&all_shields) {
            Some(Value::List(list)) => list,
            _ => Vec::new(),
        };

        if networks.is_empty() || shields.is_empty() {
            continue;
        }

        let mut pairs: Vec<(String, String)> =
            networks.into_iter().zip(shields).collect();
        pairs.sort_by_key(|(network, shield)| (family.importance)(network, shield));

        feature
            .properties
            .insert(format!("{}network", family.prefix), pairs[0].0.clone());
        feature
            .properties
            .insert(format!("{}shield_text", family.prefix), pairs[0].1.clone());

        let (networks, shields): (Vec<String>, Vec<String>) = pairs.into_iter().unzip();
        feature.properties.insert(all_networks, networks);
        feature.properties.insert(all_shields, shields);
    }
}

/// Numeric importance of a road network, lower is more important.
///
/// National-level roads rank above regional, and the deeper the network is
/// in the `CC:...` hierarchy the less important the road. Lower ref
/// numbers beat higher ones within the same network.
fn road_network_importance(network: &str, reference: &str) -> i64 {
    let tier: i64 = if network.is_empty() {
        return 9999;
    } else if network == "US:I" || network.contains(":national") {
        1
    } else if network == "US:US" || network.contains("regional") {
        2
    } else {
        network.split(':').count() as i64 + 3
    };

    let rc = leading_number(reference).clamp(0, 9999);
    tier * 10000 + rc
}

fn generic_network_importance(network: &str, reference: &str, code: i64) -> i64 {
    if reference.is_empty() {
        // no ref at all reads as a very high ref, and so reduced importance
        return code * 10000 + 9999;
    }

    // A non-numeric ref is likely a name, which might be more important
    // than a number.
    let rc = reference.parse::<i64>().unwrap_or(0).clamp(0, 9999);
    code * 10000 + rc
}

fn walking_network_importance(network: &str, reference: &str) -> i64 {
    let code = match network {
        "iwn" => 1,
        "nwn" => 2,
        "rwn" => 3,
        "lwn" => 4,
        _ => 4,
    };
    generic_network_importance(network, reference, code)
}

fn bicycle_network_importance(network: &str, reference: &str) -> i64 {
    let code = match network {
        "icn" => 1,
        "ncn" => 2,
        "rcn" => 3,
        "lcn" => 4,
        _ => 4,
    };
    generic_network_importance(network, reference, code)
}

fn bus_network_importance(network: &str, reference: &str) -> i64 {
    // bus networks have no code hierarchy
    generic_network_importance(network, reference, 0)
}

fn leading_number(s: &str) -> i64 {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

static NUMBER_AT_FRONT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+\w*)").unwrap());
static SINGLE_LETTER_THEN_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^\d\s_])[ -]?(\d+)$").unwrap());
static LETTERS_THEN_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[^\d\s_]+[ -]?(\d+)").unwrap());
static UA_TERRITORIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\w)-(\d+)-(\d+)$").unwrap());

/// Extract the text to display inside a road shield from the raw ref and
/// network.
fn road_shield_text(network: &str, reference: &str) -> String {
    if reference.is_empty() {
        return String::new();
    }

    // FI-PI-LI is just a special case
    if reference == "FI-PI-LI" {
        return reference.to_string();
    }

    // These "belt" roads have names in the ref which should be in the
    // shield, there's no number.
    if network == "US:PA:Belt" {
        return reference.to_string();
    }

    // Ukrainian territorial roads have internal dashes to remove.
    if network.starts_with("ua:") {
        if let Some(m) = UA_TERRITORIAL.captures(reference) {
            return format!("{}{}{}", &m[1], &m[2], &m[3]);
        }
    }

    // Greek refs keep their alphabetic prefixes, unlike other roads.
    if network.starts_with("GR:") || network.starts_with("gr:") {
        return reference.to_string();
    }

    if let Some(m) = NUMBER_AT_FRONT.captures(reference) {
        return m[1].to_string();
    }

    if let Some(m) = SINGLE_LETTER_THEN_NUMBER.captures(reference) {
        return format!("{}{}", &m[1], &m[2]);
    }

    if let Some(m) = LETTERS_THEN_NUMBERS.captures(reference) {
        return m[1].to_string();
    }

    reference.to_string()
}

fn default_shield_text(_network: &str, reference: &str) -> String {
    reference.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Properties;
    use geo_types::{Geometry, Point};
    use std::sync::Arc;

    fn feature(props: &[(&str, Value)]) -> Feature {
        let mut properties = Properties::new();
        for (k, v) in props {
            properties.insert(*k, v.clone());
        }
        Feature::new(Arc::new(Geometry::Point(Point::new(0.0, 0.0))), properties)
    }

    #[test]
    fn road_shield_text_rules() {
        let cases: &[(&str, &str, &str)] = &[
            ("", "", ""),
            ("", "FI-PI-LI", "FI-PI-LI"),
            ("US:PA:Belt", "Green Belt", "Green Belt"),
            ("ua:xyz", "a-10-10", "a1010"),
            ("ua:xyz", "10-12", "10"),
            ("gr:xyz", "10-12", "10-12"),
            ("GR:xyz", "10-12", "10-12"),
            ("xyz", "10-abx", "10"),
            ("xyz", "A 6", "A6"),
            ("xyz", "I-80", "I80"),
            ("xyz", "ca 6", "6"),
            ("xyz", "ca 6;ca 20", "6"),
            ("xyz", "Loop", "Loop"),
        ];

        for (network, reference, want) in cases {
            assert_eq!(
                road_shield_text(network, reference),
                *want,
                "network={network} ref={reference}"
            );
        }
    }

    #[test]
    fn road_importance_tiers() {
        assert!(road_network_importance("US:I", "90") < road_network_importance("US:US", "6"));
        assert!(road_network_importance("US:US", "6") < road_network_importance("US:OH", "3"));
        assert!(
            road_network_importance("CC:national", "1") < road_network_importance("US:US", "1")
        );
        assert_eq!(road_network_importance("", "1"), 9999);
        // lower refs win within a network
        assert!(road_network_importance("US:US", "6") < road_network_importance("US:US", "20"));
    }

    #[test]
    fn walking_importance_codes() {
        assert!(walking_network_importance("iwn", "1") < walking_network_importance("nwn", "1"));
        assert!(walking_network_importance("rwn", "") > walking_network_importance("rwn", "2"));
    }

    #[test]
    fn merge_uses_operator_when_network_missing() {
        let mut f = feature(&[
            ("ref", Value::Str("30".into())),
            (
                "operator",
                Value::Str("Ohio Department of Transportation".into()),
            ),
        ]);
        merge_networks_from_tags(&mut f);

        assert_eq!(
            f.properties.get("mz_networks"),
            Some(&Value::List(vec![
                "road".into(),
                "US:OH".into(),
                "30".into()
            ]))
        );
        assert!(!f.properties.contains_key("ref"));
    }

    #[test]
    fn merge_requires_both_network_and_ref() {
        let mut f = feature(&[("network", Value::Str("US:US".into()))]);
        merge_networks_from_tags(&mut f);
        assert!(!f.properties.contains_key("mz_networks"));
        assert!(f.properties.contains_key("network"));
    }

    #[test]
    fn extract_and_choose_most_important() {
        let list: Vec<String> = [
            "road", "US:OH", "3", //
            "road", "US:US", "6", //
            "road", "US:US", "20", //
            "bicycle", "lcn", "5",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut f = feature(&[("mz_networks", Value::List(list))]);
        extract_network_information(&mut f);

        assert_eq!(
            f.properties.get("all_networks"),
            Some(&Value::List(vec![
                "US:OH".into(),
                "US:US".into(),
                "US:US".into()
            ]))
        );
        assert!(f.properties.contains_key("all_bicycle_networks"));
        assert!(!f.properties.contains_key("mz_networks"));

        choose_most_important_network(&mut f);
        assert_eq!(
            f.properties.str_or("shield_text", ""),
            "6",
            "US:US/6 beats US:US/20 and US:OH/3"
        );
        assert_eq!(f.properties.str_or("network", ""), "US:US");
        assert_eq!(f.properties.str_or("bicycle_shield_text", ""), "5");
    }
}
