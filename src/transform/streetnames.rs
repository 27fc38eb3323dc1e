//! US street name abbreviation, e.g. "North Expressway Northeast" to
//! "North Expwy. NE".

fn direction(word: &str) -> Option<&'static str> {
    match word {
        "north" | "n" => Some("N"),
        "northeast" | "ne" => Some("NE"),
        "east" | "e" => Some("E"),
        "southeast" | "se" => Some("SE"),
        "south" | "s" => Some("S"),
        "southwest" | "sw" => Some("SW"),
        "west" | "w" => Some("W"),
        "northwest" | "nw" => Some("NW"),
        _ => None,
    }
}

fn road_type(word: &str) -> Option<&'static str> {
    match word {
        "ave" | "avenue" => Some("Ave."),
        "blvd" | "boulevard" => Some("Blvd."),
        "court" | "ct" => Some("Ct."),
        "dr" | "drive" => Some("Dr."),
        "expressway" | "expwy" => Some("Expwy."),
        "freeway" | "fwy" => Some("Fwy."),
        "highway" | "hwy" => Some("Hwy."),
        "lane" | "ln" => Some("Ln."),
        "parkway" | "pkwy" => Some("Pkwy."),
        "pl" | "place" => Some("Pl."),
        "rd" | "road" => Some("Rd."),
        "st" | "street" => Some("St."),
        "ter" | "terrace" => Some("Ter."),
        "tr" | "trail" => Some("Tr."),
        "way" | "wy" => Some("Wy."),
        _ => None,
    }
}

/// Shorten a US street name by abbreviating the leading/trailing direction
/// and the road type.
pub fn shorten(name: &str) -> String {
    let trimmed = name.trim();
    let mut parts: Vec<&str> = trimmed.split_whitespace().collect();
    let keys: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();

    let n = parts.len();
    if n >= 3 {
        if let (Some(dir), Some(ty)) = (direction(&keys[0]), road_type(&keys[n - 1])) {
            // like "North Herp Derp Road"
            parts[0] = dir;
            parts[n - 1] = ty;
            return parts.join(" ");
        }

        if let (Some(ty), Some(dir)) = (road_type(&keys[n - 2]), direction(&keys[n - 1])) {
            // like "Herp Derp Road North"
            parts[n - 2] = ty;
            parts[n - 1] = dir;
            return parts.join(" ");
        }
    }

    if n >= 2 {
        if let Some(ty) = road_type(&keys[n - 1]) {
            // like "Herp Derp Road"
            parts[n - 1] = ty;
        }
    }

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_and_type() {
        assert_eq!(shorten("North Expressway Northeast"), "North Expwy. NE");
        assert_eq!(shorten("North Capitol Street"), "N Capitol St.");
    }

    #[test]
    fn trailing_direction() {
        assert_eq!(shorten("Herp Derp Road North"), "Herp Derp Rd. N");
    }

    #[test]
    fn type_only() {
        assert_eq!(shorten("West Superior Avenue"), "W Superior Ave.");
        assert_eq!(shorten("Main Street"), "Main St.");
    }

    #[test]
    fn unknown_unchanged() {
        assert_eq!(shorten("Broadway"), "Broadway");
        assert_eq!(shorten("El Camino Real"), "El Camino Real");
    }
}
