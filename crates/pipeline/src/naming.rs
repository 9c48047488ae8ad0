//! Deterministic output naming.

use etl_common::{CrsCode, Season};

/// Lower-case slug: runs of non-alphanumeric characters collapse to `_`.
///
/// Empty results fall back to `"aoi"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        "aoi".to_string()
    } else {
        slug
    }
}

/// `{variable}_{year}_{season}_{aoi}_{crs}.tif`
pub fn output_filename(variable: &str, year: i32, season: Season, aoi_slug: &str, crs: CrsCode) -> String {
    format!(
        "{}_{}_{}_{}_{}.tif",
        slugify(variable),
        year,
        season.as_str(),
        aoi_slug,
        crs.slug()
    )
}
