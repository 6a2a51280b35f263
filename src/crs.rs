//! Coordinate Reference System identifiers.
//!
//! The pipeline never transforms coordinates itself; it only passes a target
//! CRS to the format converter. Every output file is written in the
//! configured target CRS (WGS84 unless overridden), which is what web map
//! clients expect for GeoJSON and TopoJSON.

/// Common CRS codes used throughout the pipeline.
pub mod codes {
    /// WGS84 geographic coordinate system (lon/lat in degrees).
    /// Default target for every generated file.
    pub const WGS84: &str = "EPSG:4326";
}

/// Extract the numeric code from an `EPSG:<code>` identifier.
///
/// The authority prefix is matched case-insensitively, as GDAL does.
pub fn epsg_number(crs: &str) -> Option<u32> {
    let (authority, code) = crs.split_once(':')?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_codes() {
        assert_eq!(codes::WGS84, "EPSG:4326");
        assert_eq!(epsg_number(codes::WGS84), Some(4326));
        assert_eq!(epsg_number("EPSG:4283"), Some(4283));
    }

    #[test]
    fn test_epsg_number_case_insensitive_authority() {
        assert_eq!(epsg_number("epsg:3857"), Some(3857));
    }

    #[test]
    fn test_epsg_number_rejects_other_forms() {
        assert_eq!(epsg_number("4326"), None);
        assert_eq!(epsg_number("ESRI:102100"), None);
        assert_eq!(epsg_number("EPSG:"), None);
        assert_eq!(epsg_number("EPSG:43a6"), None);
        assert_eq!(epsg_number("+proj=longlat +datum=WGS84"), None);
    }
}
