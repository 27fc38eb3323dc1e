//! Synthetic columns and the named built-in function registry for `call`
//! expressions.

use serde_yaml::Value as Doc;

use super::error::CompileError;
use super::expression::Expression;
use super::Context;
use crate::filter::condition::clean_key;
use crate::geometry::geometry_type;
use crate::util;
use crate::value::{TagMap, Value};

/// The `col` expression: a tag fetch, or one of a fixed registry of
/// synthetic columns the original data source computed in SQL.
#[derive(Debug, Clone)]
pub enum ColExpr {
    Tag(String),
    Height,
    Zoom,
    Area,
    IsBusRoute,
    CyclingNetwork,
    RelNetworks,
    IsBuildingOrPart,
}

/// Known `mz_` columns that have no replacement here; they fall through to
/// a plain tag fetch instead of failing the compile.
const UNSUPPORTED_MZ_COLUMNS: &[&str] = &["mz_label_placement", "mz_n_photos"];

impl ColExpr {
    pub fn compile(name: &str, doc: &Doc) -> Result<Expression, CompileError> {
        let key = clean_key(name);
        match key {
            "height" => return Ok(Expression::Col(ColExpr::Height)),
            "zoom" => return Ok(Expression::Col(ColExpr::Zoom)),
            "area" | "way_area" => return Ok(Expression::Col(ColExpr::Area)),
            "is_bus_route" => return Ok(Expression::Col(ColExpr::IsBusRoute)),
            "mz_cycling_network" => return Ok(Expression::Col(ColExpr::CyclingNetwork)),
            "mz_networks" => return Ok(Expression::Col(ColExpr::RelNetworks)),
            "mz_is_building" => return Ok(Expression::Col(ColExpr::IsBuildingOrPart)),
            // transit scoring never made it over from the original source
            "mz_transit_score" | "mz_transit_root_relation_id" => return Ok(Expression::Nil),
            _ => {}
        }

        if key.starts_with("mz_") && !UNSUPPORTED_MZ_COLUMNS.contains(&key) {
            // A new synthetic column would silently evaluate as a missing
            // tag and corrupt output, so refuse it here.
            return Err(CompileError::new(
                format!("col: unsupported synthetic column: {key}"),
                doc,
            ));
        }

        Ok(Expression::Col(ColExpr::Tag(key.to_string())))
    }

    pub fn eval(&self, ctx: &mut Context) -> Option<Value> {
        match self {
            ColExpr::Tag(key) => {
                let val = ctx.tag(key);
                if val.is_empty() {
                    None
                } else {
                    Some(Value::Str(val.to_string()))
                }
            }
            ColExpr::Height => {
                let h = ctx.height();
                if h == 0.0 {
                    None
                } else {
                    Some(Value::Num(h))
                }
            }
            ColExpr::Zoom => Some(Value::Num(ctx.min_zoom_from_area())),
            ColExpr::Area => Some(Value::Num(ctx.area())),
            ColExpr::IsBusRoute => is_bus_route(ctx),
            ColExpr::CyclingNetwork => {
                cycling_network(ctx).map(|n| Value::Str(n.to_string()))
            }
            ColExpr::RelNetworks => rel_networks(ctx),
            ColExpr::IsBuildingOrPart => is_building_or_part(ctx),
        }
    }

    pub fn eval_num(&self, ctx: &mut Context) -> f64 {
        match self {
            ColExpr::Height => ctx.height(),
            ColExpr::Zoom => ctx.min_zoom_from_area(),
            ColExpr::Area => ctx.area(),
            other => panic!("column is not numeric: {other:?}"),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColExpr::Height | ColExpr::Zoom | ColExpr::Area)
    }
}

/// A compiled `call` expression.
#[derive(Debug, Clone)]
pub enum FuncExpr {
    BuildingKindDetail,
    BuildingPartKindDetail,
    PathMajorRoute,
    FerryLevel,
    IsBusRoute,
    CyclingNetwork,
    ToFloatMeters(Box<Expression>),
    MinZoomHighwayLevelGate,
    SafeInt(Box<Expression>),
    SafeIntNum(Box<Expression>),
    TagStrToBool(Box<Expression>),
    TrueOrNone(Box<Expression>),
    IsBuildingOrPart,
}

/// Resolve `func` against the built-in registry.
pub fn compile_call_expr(
    name: &str,
    mut args: Vec<Expression>,
    doc: &Doc,
) -> Result<Expression, CompileError> {
    let one_arg = |args: &mut Vec<Expression>| -> Result<Box<Expression>, CompileError> {
        if args.is_empty() {
            return Err(CompileError::new(format!("func: {name}: requires 1 arg"), doc));
        }
        Ok(Box::new(args.remove(0)))
    };

    let func = match name {
        "mz_building_kind_detail" => FuncExpr::BuildingKindDetail,
        "mz_building_part_kind_detail" => FuncExpr::BuildingPartKindDetail,
        "mz_calculate_path_major_route" => FuncExpr::PathMajorRoute,
        "mz_calculate_ferry_level" => FuncExpr::FerryLevel,
        "mz_calculate_is_bus_route" => FuncExpr::IsBusRoute,
        "mz_cycling_network" => FuncExpr::CyclingNetwork,
        "mz_to_float_meters" => FuncExpr::ToFloatMeters(one_arg(&mut args)?),
        "mz_get_min_zoom_highway_level_gate" => FuncExpr::MinZoomHighwayLevelGate,
        "util.safe_int" => {
            let arg = one_arg(&mut args)?;
            if arg.is_numeric() {
                FuncExpr::SafeIntNum(arg)
            } else {
                FuncExpr::SafeInt(arg)
            }
        }
        "util.tag_str_to_bool" => FuncExpr::TagStrToBool(one_arg(&mut args)?),
        "util.true_or_none" => FuncExpr::TrueOrNone(one_arg(&mut args)?),
        "util.is_building" => FuncExpr::IsBuildingOrPart,
        _ => {
            return Err(CompileError::new(
                format!("call: function not defined: {name}"),
                doc,
            ))
        }
    };

    Ok(Expression::Func(func))
}

impl FuncExpr {
    pub fn eval(&self, ctx: &mut Context) -> Option<Value> {
        match self {
            FuncExpr::BuildingKindDetail => {
                building_kind_detail(ctx.tag("building")).map(|v| Value::Str(v.to_string()))
            }
            FuncExpr::BuildingPartKindDetail => building_part_kind_detail(
                ctx.tag("building:part"),
            )
            .map(|v| Value::Str(v.to_string())),
            FuncExpr::PathMajorRoute
            | FuncExpr::FerryLevel
            | FuncExpr::MinZoomHighwayLevelGate => Some(Value::Num(self.eval_num(ctx))),
            FuncExpr::IsBusRoute => is_bus_route(ctx),
            FuncExpr::CyclingNetwork => {
                cycling_network(ctx).map(|n| Value::Str(n.to_string()))
            }
            FuncExpr::ToFloatMeters(arg) => {
                arg.eval(ctx)?;
                Some(Value::Num(self.eval_num(ctx)))
            }
            FuncExpr::SafeInt(arg) => match arg.eval(ctx)? {
                Value::Num(v) if v == 0.0 => None,
                other => Some(other),
            },
            FuncExpr::SafeIntNum(arg) => {
                let v = arg.eval_num(ctx);
                if v == 0.0 {
                    None
                } else {
                    Some(Value::Num(v))
                }
            }
            FuncExpr::TagStrToBool(arg) => {
                let val = arg.eval(ctx)?;
                let s = val.as_str()?.to_lowercase();
                if s == "yes" || s == "true" {
                    Some(Value::Bool(true))
                } else {
                    None
                }
            }
            FuncExpr::TrueOrNone(arg) => {
                // Anything that is not the boolean true collapses to nil,
                // including strings like "yes"; rules rely on this.
                match arg.eval(ctx)? {
                    Value::Bool(true) => Some(Value::Bool(true)),
                    _ => None,
                }
            }
            FuncExpr::IsBuildingOrPart => is_building_or_part(ctx),
        }
    }

    pub fn eval_num(&self, ctx: &mut Context) -> f64 {
        match self {
            FuncExpr::ToFloatMeters(arg) => match arg.eval(ctx) {
                None => 0.0,
                Some(Value::Num(v)) => v,
                Some(Value::Str(s)) => util::to_f64_meters(&s).unwrap_or(0.0),
                Some(other) => {
                    // A rule-file/engine mismatch that would silently
                    // corrupt output; fail loudly.
                    panic!("to_float_meters: value is not valid: {other:?}")
                }
            },
            FuncExpr::FerryLevel => ferry_level(ctx),
            FuncExpr::PathMajorRoute => path_major_route(ctx),
            FuncExpr::MinZoomHighwayLevelGate => min_zoom_highway_level_gate(ctx),
            other => panic!("function is not numeric: {other:?}"),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FuncExpr::ToFloatMeters(_)
                | FuncExpr::FerryLevel
                | FuncExpr::PathMajorRoute
                | FuncExpr::MinZoomHighwayLevelGate
        )
    }
}

fn is_building_or_part(ctx: &Context) -> Option<Value> {
    // building=no is common enough that it must not count as a building,
    // and kind=no would be weird anyway.
    let building = ctx.tag("building");
    if !building.is_empty() && building != "no" {
        return Some(Value::Bool(true));
    }

    let part = ctx.tag("building:part");
    if !part.is_empty() && part != "no" {
        return Some(Value::Bool(true));
    }

    None
}

fn is_bus_route(ctx: &Context) -> Option<Value> {
    for r in ctx.relation_memberships() {
        if r.get("type").map(String::as_str) == Some("route") {
            let route = r.get("route").map(String::as_str).unwrap_or("");
            if route == "bus" || route == "trolleybus" {
                return Some(Value::Bool(true));
            }
        }
    }

    None
}

fn tag_of<'a>(tags: &'a TagMap, key: &str) -> &'a str {
    tags.get(key).map(String::as_str).unwrap_or("")
}

fn is_path_major_route_relation(tags: &TagMap) -> bool {
    tag_of(tags, "type") == "route"
        && matches!(tag_of(tags, "route"), "hiking" | "foot" | "bicycle")
        && matches!(
            tag_of(tags, "network"),
            "iwn" | "nwn" | "rwn" | "lwn" | "icn" | "ncn" | "rcn" | "lcn"
        )
}

/// The most important cycling network this feature belongs to, from its
/// route relations, falling back to the `?cn`/`?cn_ref` tags.
fn cycling_network(ctx: &Context) -> Option<&'static str> {
    if ctx.tag("icn") == "yes" || !ctx.tag("icn_ref").is_empty() {
        return Some("icn");
    }

    let mut counts = [0u32; 3];
    for r in ctx.relation_memberships() {
        if !is_path_major_route_relation(r) {
            continue;
        }

        match tag_of(r, "network") {
            "icn" => return Some("icn"),
            "ncn" => counts[0] += 1,
            "rcn" => counts[1] += 1,
            "lcn" => counts[2] += 1,
            _ => {}
        }
    }

    if counts[0] != 0 || ctx.tag("ncn") == "yes" || !ctx.tag("ncn_ref").is_empty() {
        return Some("ncn");
    }
    if counts[1] != 0 || ctx.tag("rcn") == "yes" || !ctx.tag("rcn_ref").is_empty() {
        return Some("rcn");
    }
    if counts[2] != 0 || ctx.tag("lcn") == "yes" || !ctx.tag("lcn_ref").is_empty() {
        return Some("lcn");
    }

    None
}

/// Flat (route, network, ref) triples from the feature's route relations.
fn rel_networks(ctx: &Context) -> Option<Value> {
    let relations = ctx.relation_memberships();
    if relations.is_empty() {
        return None;
    }

    let mut result = Vec::with_capacity(relations.len() * 3);
    for r in relations {
        let route = tag_of(r, "route");
        let network = tag_of(r, "network");
        let reference = tag_of(r, "ref");

        if !route.is_empty() && (!network.is_empty() || !reference.is_empty()) {
            result.push(route.to_string());
            result.push(network.to_string());
            result.push(reference.to_string());
        }
    }

    Some(Value::List(result))
}

fn ferry_level(ctx: &mut Context) -> f64 {
    let is_line = ctx
        .geometry
        .as_deref()
        .map(|g| matches!(geometry_type(g), "LineString" | "MultiLineString"))
        .unwrap_or(false);
    if !is_line {
        log::debug!(
            "failed to calculate ferry level: {:?} is non-line",
            ctx.feature_id
        );
        return 0.0;
    }

    // about when the way is >= 2px in length
    let length = ctx.length();
    if length > 1224.0 {
        8.0
    } else if length > 611.0 {
        9.0
    } else if length > 306.0 {
        10.0
    } else if length > 153.0 {
        11.0
    } else if length > 76.0 {
        12.0
    } else {
        13.0
    }
}

fn path_major_route(ctx: &Context) -> f64 {
    let mut zoom = 20.0f64;

    for r in ctx.relation_memberships() {
        if !is_path_major_route_relation(r) {
            continue;
        }

        let z = match tag_of(r, "network") {
            "icn" | "ncn" => 8.0,
            "iwn" | "nwn" => 9.0,
            "rcn" => 10.0,
            "rwn" | "lcn" => 11.0,
            "lwn" => 12.0,
            _ => 20.0,
        };

        if z < zoom {
            zoom = z;
        }
    }

    zoom
}

/// Min zoom for a gate node from the most important highway through it.
fn min_zoom_highway_level_gate(ctx: &Context) -> f64 {
    let mut zoom = 0.0f64;

    for w in ctx.way_memberships() {
        let z = match tag_of(w, "highway") {
            "motorway" | "trunk" | "primary" | "motorway_link" | "trunk_link"
            | "primary_link" => 14.0,
            "secondary" | "tertiary" | "secondary_link" | "tertiary_link" => 15.0,
            "residential" | "service" | "path" | "track" | "footway" | "unclassified" => 16.0,
            _ => 17.0,
        };

        if z > zoom {
            zoom = z;
        }
    }

    if zoom == 0.0 {
        17.0
    } else {
        zoom
    }
}

fn building_kind_detail(building: &str) -> Option<&'static str> {
    const SAME: &[&str] = &[
        "abandoned", "administrative", "agricultural", "airport", "allotment_house",
        "apartments", "arbour", "bank", "barn", "basilica", "beach_hut", "bell_tower",
        "boathouse", "brewery", "bridge", "bungalow", "bunker", "cabin", "carport",
        "castle", "cathedral", "chapel", "chimney", "church", "civic", "clinic",
        "clubhouse", "collapsed", "college", "commercial", "construction", "container",
        "convent", "cowshed", "dam", "damaged", "depot", "destroyed", "detached",
        "disused", "dormitory", "duplex", "factory", "farm", "farm_auxiliary",
        "fire_station", "garage", "garages", "gazebo", "ger", "glasshouse", "government",
        "grandstand", "greenhouse", "hangar", "healthcare", "hermitage", "hospital",
        "hotel", "house", "houseboat", "hut", "industrial", "kindergarten", "kiosk",
        "library", "mall", "manor", "manufacture", "mobile_home", "monastery",
        "mortuary", "mosque", "museum", "office", "outbuilding", "parking", "pavilion",
        "power", "prison", "proposed", "pub", "public", "residential", "restaurant",
        "retail", "roof", "ruin", "ruins", "school", "semidetached_house", "service",
        "shed", "shelter", "shop", "shrine", "silo", "slurry_tank", "stable", "stadium",
        "static_caravan", "storage", "storage_tank", "store", "substation",
        "summer_cottage", "summer_house", "supermarket", "synagogue", "tank", "temple",
        "terrace", "tower", "train_station", "transformer_tower", "transportation",
        "university", "utility", "veranda", "warehouse", "wayside_shrine", "works",
    ];

    if let Some(v) = SAME.iter().find(|s| **s == building).copied() {
        return Some(v);
    }

    match building {
        "barne" => Some("barn"),
        "commercial;residential" => Some("mixed_use"),
        "constructie" => Some("construction"),
        "dwelling_house" => Some("house"),
        "education" => Some("school"),
        "greenhouse_horticulture" => Some("greenhouse"),
        "apartment" | "flat" => Some("apartments"),
        "houses" | "residences" | "residence" | "perumahan permukiman" | "residentiel1" => {
            Some("residential")
        }
        "offices" => Some("office"),
        "prefab_container" => Some("container"),
        "public_building" => Some("public"),
        "railway_station" => Some("train_station"),
        "roof=permanent" => Some("roof"),
        "stables" => Some("stable"),
        "static caravan" => Some("static_caravan"),
        "station" => Some("transportation"),
        "storage tank" => Some("storage_tank"),
        "townhome" => Some("terrace"),
        _ => None,
    }
}

fn building_part_kind_detail(part: &str) -> Option<&'static str> {
    const SAME: &[&str] = &[
        "arch", "balcony", "base", "column", "door", "elevator", "entrance", "floor",
        "hall", "main", "passageway", "pillar", "porch", "ramp", "roof", "room",
        "steps", "stilobate", "tier", "tower", "verticalpassage", "wall", "window",
    ];

    if let Some(v) = SAME.iter().find(|s| **s == part).copied() {
        return Some(v);
    }

    match part {
        "corridor" | "Corridor" | "vertical" => Some("verticalpassage"),
        "stairs" | "stairway" => Some("steps"),
        _ => None,
    }
}
