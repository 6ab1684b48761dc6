//! Location types

use serde::{Deserialize, Serialize};

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Normalize a free-text address into a cache/lookup key.
///
/// Lowercases, collapses internal whitespace and strips trailing punctuation,
/// so `"  12 Main St.,  Denver "` and `"12 main st., denver"` share a key.
pub fn normalize_address(address: &str) -> String {
    let collapsed = address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| c == '.' || c == ',' || c == ';')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_serialize() {
        let json = serde_json::to_string(&Coordinates::new(39.7, -104.9)).unwrap();
        assert_eq!(json, r#"{"lat":39.7,"lng":-104.9}"#);
    }

    #[test]
    fn test_normalize_address_collapses_whitespace_and_case() {
        assert_eq!(
            normalize_address("  1200  Larimer St,  Denver CO. "),
            "1200 larimer st, denver co"
        );
        assert_eq!(
            normalize_address("1200 Larimer St, Denver CO"),
            normalize_address("1200 larimer st,   denver co.")
        );
    }

    #[test]
    fn test_normalize_address_empty() {
        assert_eq!(normalize_address("   "), "");
    }
}
