//! Per-layer, per-feature transforms applied after a filter match.

pub mod networks;
mod streetnames;

use std::sync::{Arc, LazyLock};

use geo_types::Geometry;
use regex::Regex;

use crate::feature::Feature;
use crate::filter::Context;
use crate::geometry::representative_point;
use crate::util;
use crate::value::Value;

/// A transform mutates a matched feature's properties (or geometry) using
/// the evaluation context of the original element.
pub type Transform = fn(&mut Context, &mut Feature);

/// Resolve a transform name from a layer config.
///
/// `Some(None)` means the name is known but intentionally does nothing
/// here; `None` means the name is undefined and the layer fails to
/// compile.
pub fn lookup(name: &str) -> Option<Option<Transform>> {
    let name = name
        .strip_prefix("vectordatasource.transform.")
        .unwrap_or(name);

    let unimplemented = [
        "tags_create_dict",
        "tags_remove",
        "add_id_to_properties",
        "remove_feature_id",
        "add_road_network_from_ncat",
        "remove_zero_area",
        // already handled by min_zoom truncation in the driver
        "truncate_min_zoom_to_2dp",
    ];
    if unimplemented.contains(&name) {
        return Some(None);
    }

    let t: Transform = match name {
        "tags_name_i18n" => tags_name_i18n,
        "detect_osm_relation" => detect_osm_relation,
        "water_tunnel" => water_tunnel,
        "place_population_int" => place_population_int,
        "calculate_default_place_min_zoom" => calculate_default_place_min_zoom,
        "normalize_tourism_kind" => normalize_tourism_kind,
        "normalize_operator_values" => normalize_operator_values,
        "parse_layer_as_float" => parse_layer_as_float,
        "road_classifier" => road_classifier,
        "road_oneway" => road_oneway,
        "route_name" => route_name,
        "road_abbreviate_name" => road_abbreviate_name,
        "normalize_aerialways" => normalize_aerialways,
        "normalize_cycleway" => normalize_cycleway,
        "add_is_bicycle_related" => add_is_bicycle_related,
        "road_trim_properties" => road_trim_properties,
        "building_height" => building_height,
        "building_min_height" => building_min_height,
        "synthesize_volume" => synthesize_volume,
        "building_trim_properties" => building_trim_properties,
        "add_iata_code_to_airports" => add_iata_code_to_airports,
        "add_uic_ref" => add_uic_ref,
        "normalize_social_kind" => normalize_social_kind,
        "normalize_medical_kind" => normalize_medical_kind,
        "make_representative_point" => make_representative_point,
        "height_to_meters" => height_to_meters,
        "pois_capacity_int" => pois_capacity_int,
        "elevation_to_meters" => elevation_to_meters,
        "admin_level_as_int" => admin_level_as_int,
        "add_vehicle_restrictions" => add_vehicle_restrictions,
        _ => return None,
    };

    Some(Some(t))
}

fn detect_osm_relation(_ctx: &mut Context, feature: &mut Feature) {
    if feature.properties.str_or("type", "") == "relation" {
        feature.properties.insert("osm_relation", true);
    }
}

fn building_height(ctx: &mut Context, feature: &mut Feature) {
    // height is needed for volume too, so compute it in one place
    let h = ctx.height();
    if h != 0.0 {
        feature.properties.insert("height", h);
    }
}

fn building_min_height(_ctx: &mut Context, feature: &mut Feature) {
    if let Some(h) = util::to_f64(feature.properties.str_or("min_height", "")) {
        feature.properties.insert("min_height", h);
        return;
    }

    match util::to_f64(feature.properties.str_or("building_min_levels", "")) {
        Some(levels) => {
            feature
                .properties
                .insert("min_height", levels.max(0.0) * 3.0);
        }
        None => {
            feature.properties.remove("min_height");
        }
    }
}

fn synthesize_volume(_ctx: &mut Context, feature: &mut Feature) {
    let area = feature.properties.get("area").and_then(Value::as_num);
    let height = feature.properties.get("height").and_then(Value::as_num);
    if let (Some(area), Some(height)) = (area, height) {
        feature.properties.insert("volume", (area * height).floor());
    }
}

fn building_trim_properties(_ctx: &mut Context, feature: &mut Feature) {
    feature.properties.remove("building");
    feature.properties.remove("building_part");
    feature.properties.remove("building_levels");
    feature.properties.remove("building_min_levels");
}

fn road_classifier(_ctx: &mut Context, feature: &mut Feature) {
    feature.properties.remove("is_link");
    feature.properties.remove("is_tunnel");
    feature.properties.remove("is_bridge");

    if feature.properties.str_or("kind_detail", "").ends_with("_link") {
        feature.properties.insert("is_link", true);
    }

    let tunnel = feature.properties.str_or("tunnel", "");
    if tunnel == "yes" || tunnel == "true" {
        feature.properties.insert("is_tunnel", true);
    }

    let bridge = feature.properties.str_or("bridge", "");
    if bridge == "yes" || bridge == "true" {
        feature.properties.insert("is_bridge", true);
    }
}

fn road_trim_properties(_ctx: &mut Context, feature: &mut Feature) {
    feature.properties.remove("bridge");
    feature.properties.remove("tunnel");
}

fn road_oneway(_ctx: &mut Context, feature: &mut Feature) {
    match feature.properties.str_or("oneway", "") {
        "-1" | "reverse" => {
            if reverse_line_direction(feature) {
                feature.properties.insert("oneway", "yes");
            }
        }
        "true" | "1" => {
            feature.properties.insert("oneway", "yes");
        }
        "false" | "0" => {
            feature.properties.insert("oneway", "no");
        }
        _ => {}
    }
}

fn reverse_line_direction(feature: &mut Feature) -> bool {
    if matches!(feature.geometry.as_ref(), Geometry::LineString(_)) {
        if let Geometry::LineString(ls) = Arc::make_mut(&mut feature.geometry) {
            ls.0.reverse();
            return true;
        }
    }

    false
}

fn route_name(_ctx: &mut Context, feature: &mut Feature) {
    let rn = feature.properties.str_or("route_name", "").to_string();
    if rn.is_empty() {
        return;
    }

    let name = feature.properties.str_or("name", "");
    if name.is_empty() {
        feature.properties.insert("name", rn);
        feature.properties.remove("route_name");
    } else if rn == name {
        feature.properties.remove("route_name");
    }
}

fn road_abbreviate_name(_ctx: &mut Context, feature: &mut Feature) {
    let name = feature.properties.str_or("name", "");
    if name.is_empty() {
        return;
    }

    let short = streetnames::shorten(name);
    feature.properties.insert("name", short);
}

fn place_population_int(_ctx: &mut Context, feature: &mut Feature) {
    match util::to_f64(feature.properties.str_or("population", "")) {
        Some(pop) => feature.properties.insert("population", pop.floor()),
        None => {
            feature.properties.remove("population");
        }
    }
}

fn pois_capacity_int(_ctx: &mut Context, feature: &mut Feature) {
    match util::to_f64(feature.properties.str_or("capacity", "")) {
        Some(capacity) => feature.properties.insert("capacity", capacity.floor()),
        None => {
            feature.properties.remove("capacity");
        }
    }
}

fn water_tunnel(_ctx: &mut Context, feature: &mut Feature) {
    let tunnel = feature
        .properties
        .remove("tunnel")
        .and_then(|v| v.as_str().map(str::to_string));

    match tunnel.as_deref() {
        None | Some("") | Some("no") | Some("false") | Some("0") => {}
        Some(_) => {
            feature.properties.insert("is_tunnel", true);
        }
    }
}

fn admin_level_as_int(_ctx: &mut Context, feature: &mut Feature) {
    let level = feature.properties.str_or("admin_level", "").to_string();
    feature.properties.remove("admin_level");
    if level.is_empty() {
        return;
    }

    if let Some(l) = util::to_f64(&level) {
        feature.properties.insert("admin_level", l.floor());
    }
}

fn parse_layer_as_float(_ctx: &mut Context, feature: &mut Feature) {
    let layer = feature.properties.str_or("layer", "");
    if layer.is_empty() {
        return;
    }

    match util::to_f64(layer) {
        Some(f) => feature.properties.insert("layer", f),
        None => {
            feature.properties.remove("layer");
        }
    }
}

/// Rough default min zooms per place kind, for places that didn't come
/// from a curated source.
fn default_place_min_zoom(kind: &str) -> Option<f64> {
    let mz = match kind {
        "locality" | "isolated_dwelling" | "farm" => 13.0,
        "hamlet" => 12.0,
        "village" => 11.0,
        "suburb" | "quarter" | "borough" => 10.0,
        "town" | "city" => 8.0,
        "province" | "state" => 4.0,
        "sea" => 3.0,
        "country" | "ocean" | "continent" => 0.0,
        _ => return None,
    };
    Some(mz)
}

fn calculate_default_place_min_zoom(_ctx: &mut Context, feature: &mut Feature) {
    if feature.properties.contains_key("min_zoom") {
        return;
    }

    let kind = feature.properties.str_or("kind", "");
    let Some(mut mz) = default_place_min_zoom(kind) else {
        return;
    };

    // state and country capitals show up earlier
    if kind == "city" || kind == "town" {
        if !feature.properties.str_or("region_capital", "").is_empty() {
            mz -= 1.0;
        } else if !feature.properties.str_or("country_capital", "").is_empty() {
            mz -= 2.0;
        }
    }

    feature.properties.insert("min_zoom", mz);
}

fn normalize_aerialways(_ctx: &mut Context, feature: &mut Feature) {
    match feature.properties.str_or("aerialway", "") {
        // cableway is an apparently deprecated synonym
        "cableway" => feature.properties.insert("aerialway", "zip_line"),
        // 'yes' tells us nothing, normalise to the common 'unknown'
        "yes" => feature.properties.insert("aerialway", "unknown"),
        _ => {
            feature.properties.remove("aerialway");
        }
    }
}

fn make_representative_point(ctx: &mut Context, feature: &mut Feature) {
    let Some(geometry) = ctx.geometry.as_deref() else {
        return;
    };
    if let Some(point) = representative_point(geometry) {
        feature.geometry = Arc::new(Geometry::Point(point));
    }
}

static IATA_SHORT_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

/// Move a valid 3-character IATA code from the tags onto airport features.
/// Longer codes and ones with numbers exist, but they mark less important
/// airports.
fn add_iata_code_to_airports(ctx: &mut Context, feature: &mut Feature) {
    let kind = feature.properties.str_or("kind", "");
    if kind != "aerodrome" && kind != "airport" {
        return;
    }

    let iata = ctx.tag("iata").trim().to_uppercase();
    if IATA_SHORT_CODE.is_match(&iata) {
        feature.properties.insert("iata", iata);
    }
}

/// Move a valid uic_ref tag (exactly 7 digits) onto the feature.
fn add_uic_ref(ctx: &mut Context, feature: &mut Feature) {
    let uic = ctx.tag("uic_ref").trim();
    if uic.len() != 7 {
        return;
    }

    if let Ok(v) = uic.parse::<i64>() {
        feature.properties.insert("uic_ref", v as f64);
    }
}

/// Promote `zoo=*` and `attraction=*` values to the main kind; there is a
/// lot more tourism detail in those tags than in `tourism=*`.
fn normalize_tourism_kind(_ctx: &mut Context, feature: &mut Feature) {
    let zoo = feature.properties.str_or("zoo", "").to_string();
    if !zoo.is_empty() {
        feature.properties.insert("kind", zoo);
        feature.properties.insert("tourism", "attraction");
        return;
    }

    let attraction = feature.properties.str_or("attraction", "").to_string();
    if !attraction.is_empty() {
        feature.properties.insert("kind", attraction);
        feature.properties.insert("tourism", "attraction");
    }
}

/// Social facilities carry their detail in `social_facility=*`; promote it
/// to the kind, keep the original for disambiguation, and expand the
/// semicolon-delimited `social_facility:for` into a real list.
fn normalize_social_kind(ctx: &mut Context, feature: &mut Feature) {
    if feature.properties.str_or("kind", "") != "social_facility" {
        return;
    }

    let social_facility = ctx.tag("social_facility").to_string();
    if social_facility.is_empty() {
        return;
    }

    feature.properties.insert("kind", social_facility.clone());
    feature.properties.insert("social_facility", social_facility);

    let for_list = ctx.tag("social_facility:for");
    if !for_list.is_empty() {
        let list: Vec<String> = for_list.split(';').map(str::to_string).collect();
        feature.properties.insert("for", list);
    }
}

/// Doctors and dentists have a semicolon-delimited speciality list in
/// `healthcare:speciality`; expand it.
fn normalize_medical_kind(ctx: &mut Context, feature: &mut Feature) {
    let kind = feature.properties.str_or("kind", "");
    if kind == "clinic" || kind == "doctors" || kind == "dentist" {
        let speciality = ctx.tag("healthcare:speciality");
        if !speciality.is_empty() {
            let list: Vec<String> = speciality.split(';').map(str::to_string).collect();
            feature.properties.insert("speciality", list);
        }
    }
}

fn height_to_meters(_ctx: &mut Context, feature: &mut Feature) {
    let height = feature
        .properties
        .get("tags")
        .and_then(Value::as_tags)
        .and_then(|t| t.get("height"))
        .cloned()
        .unwrap_or_default();
    if height.is_empty() {
        return;
    }

    match util::to_f64_meters(&height) {
        Some(h) => feature.properties.insert("height", h),
        None => {
            feature.properties.remove("height");
        }
    }
}

fn elevation_to_meters(_ctx: &mut Context, feature: &mut Feature) {
    let elevation = feature.properties.str_or("elevation", "");
    if elevation.is_empty() {
        return;
    }

    match util::to_f64_meters(elevation) {
        Some(e) => feature.properties.insert("elevation", e),
        None => {
            feature.properties.remove("elevation");
        }
    }
}

/// Collapse matching cycleway:left/cycleway:right pairs into a single
/// cycleway property, and fold cycleway_both into cycleway.
fn normalize_cycleway(_ctx: &mut Context, feature: &mut Feature) {
    let mut cycleway = feature.properties.str_or("cycleway", "").to_string();
    let left = feature.properties.str_or("cycleway_left", "").to_string();
    let right = feature.properties.str_or("cycleway_right", "").to_string();

    let both = feature
        .properties
        .remove("cycleway_both")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    if !both.is_empty() && cycleway.is_empty() {
        cycleway = both;
        feature.properties.insert("cycleway", cycleway.clone());
    }

    if !left.is_empty()
        && left == right
        && (cycleway.is_empty() || left == cycleway)
    {
        feature.properties.insert("cycleway", left);
        feature.properties.remove("cycleway_right");
        feature.properties.remove("cycleway_left");
    }
}

/// Mark features that have anything bicycle-ish about them. Depends on
/// normalize_cycleway having run first.
fn add_is_bicycle_related(_ctx: &mut Context, feature: &mut Feature) {
    feature.properties.remove("is_bicycle_related");

    let props = &feature.properties;
    let related = props.contains_key("bicycle_network")
        || props.contains_key("cycleway")
        || props.contains_key("cycleway_left")
        || props.contains_key("cycleway_right")
        || props.str_or("kind_detail", "") == "cycleway"
        || matches!(props.str_or("bicycle", ""), "yes" | "designated")
        || matches!(props.str_or("ramp_bicycle", ""), "yes" | "left" | "right");

    if related {
        feature.properties.insert("is_bicycle_related", true);
    }
}

fn lookup_normalized_operator(operator: &str) -> Option<&'static str> {
    match operator {
        "National Park Service"
        | "US National Park Service"
        | "U.S. National Park Service"
        | "US National Park service" => Some("United States National Park Service"),
        "US Forest Service"
        | "U.S. Forest Service"
        | "USDA Forest Service"
        | "United States Department of Agriculture"
        | "US National Forest Service"
        | "United State Forest Service"
        | "U.S. National Forest Service" => Some("United States Forest Service"),
        "Department of National Parks NSW"
        | "Dept of NSW National Parks"
        | "Dept of National Parks NSW"
        | "NSW National Parks"
        | "NSW National Parks & Wildlife Service"
        | "NSW National Parks and Wildlife Service"
        | "NSW Parks and Wildlife Service"
        | "NSW Parks and Wildlife Service (NPWS)"
        | "National Parks and Wildlife NSW"
        | "National Parks and Wildlife Service NSW" => {
            Some("National Parks & Wildife Service NSW")
        }
        _ => None,
    }
}

/// Normalise the many spellings of a few well-known operators.
fn normalize_operator_values(_ctx: &mut Context, feature: &mut Feature) {
    let operator = feature.properties.str_or("operator", "");
    if operator.is_empty() {
        return;
    }

    if let Some(normalized) = lookup_normalized_operator(operator) {
        feature.properties.insert("operator", normalized);
    }
}

pub(crate) const TAG_NAME_ALTERNATES: &[&str] = &[
    "int_name",
    "loc_name",
    "nat_name",
    "official_name",
    "old_name",
    "reg_name",
    "short_name",
    "name_left",
    "name_right",
    "name:short",
];

/// Copy recognised alternate name tags onto the feature when they differ
/// from the main name.
fn tags_name_i18n(ctx: &mut Context, feature: &mut Feature) {
    let name = ctx.tag("name");
    if name.is_empty() {
        return;
    }

    for alt in TAG_NAME_ALTERNATES {
        let val = ctx.tag(alt);
        if !val.is_empty() && val != name {
            feature.properties.insert(*alt, val.to_string());
        }
    }
}

struct Restriction {
    kind: &'static str,
    format: fn(&str) -> Option<String>,
}

fn restriction_metres(val: &str) -> Option<String> {
    util::to_f64_meters(val).map(|m| format!("{}m", util::one_decimal_point(m)))
}

fn restriction_tonnes(val: &str) -> Option<String> {
    util::to_f64(val).map(|t| format!("{}t", util::one_decimal_point(t)))
}

fn restriction_false(val: &str) -> Option<String> {
    (val == "no").then(String::new)
}

const RESTRICTIONS: &[(&str, Restriction)] = &[
    ("maxwidth", Restriction { kind: "width", format: restriction_metres }),
    ("maxlength", Restriction { kind: "length", format: restriction_metres }),
    ("maxheight", Restriction { kind: "height", format: restriction_metres }),
    ("maxweight", Restriction { kind: "weight", format: restriction_tonnes }),
    ("maxaxleload", Restriction { kind: "wpa", format: restriction_tonnes }),
    ("hazmat", Restriction { kind: "hazmat", format: restriction_false }),
];

/// Parse maximum height/weight/length/etc vehicle restrictions into
/// `hgv_restriction` and `hgv_restriction_shield_text`.
fn add_vehicle_restrictions(_ctx: &mut Context, feature: &mut Feature) {
    let mut restriction = "";
    let mut shield_text = String::new();

    for (key, r) in RESTRICTIONS {
        let val = feature.properties.str_or(key, "");
        if val.is_empty() {
            continue;
        }

        let Some(text) = (r.format)(val) else {
            continue;
        };

        if restriction.is_empty() {
            restriction = r.kind;
            shield_text = text;
        } else {
            restriction = "multiple";
            shield_text.clear();
        }
    }

    if !restriction.is_empty() {
        feature.properties.insert("hgv_restriction", restriction);
    }
    if !shield_text.is_empty() {
        feature
            .properties
            .insert("hgv_restriction_shield_text", shield_text);
    }
}
