use std::sync::LazyLock;

use regex::Regex;

pub const GEO_LOC_NAME: &str = "geo_loc_name";

const UNKNOWN_PART: &str = "unknown";

static SPACED_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *: *").expect("colon pattern compiles"));

/// Brings a `geo_loc_name` into `<country>:<location>` form.
///
/// Spaces around the colon are removed and missing halves are filled with
/// `unknown`. Casing is left alone.
pub fn normalize_geo_loc_name(raw: &str) -> String {
    let value = SPACED_COLON.replace_all(raw, ":");
    let value = value.trim();
    if value.is_empty() {
        return format!("{UNKNOWN_PART}:{UNKNOWN_PART}");
    }
    let Some(colon) = value.find(':') else {
        return format!("{value}:{UNKNOWN_PART}");
    };
    let mut fixed = String::with_capacity(value.len() + 2 * UNKNOWN_PART.len());
    if colon == 0 {
        fixed.push_str(UNKNOWN_PART);
    }
    fixed.push_str(value);
    if value.ends_with(':') {
        fixed.push_str(UNKNOWN_PART);
    }
    fixed
}

pub fn is_well_formed(value: &str) -> bool {
    match value.split_once(':') {
        Some((country, location)) => !country.is_empty() && !location.is_empty(),
        None => false,
    }
}
