//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;
use crate::types::Coordinates;

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    pub display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("dispatch-engine/0.3")
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub(crate) fn search_url(&self, address: &str) -> String {
        format!(
            "{}/search?q={}&format=json&limit=1",
            self.base_url,
            urlencoding::encode(address.trim())
        )
    }

    /// Geocode a free-text address.
    ///
    /// `Ok(None)` means the service answered and found nothing; transport and
    /// HTTP errors are `Err` so callers can tell an outage from a bad address.
    pub async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        let url = self.search_url(address);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Nominatim returned status {}", response.status());
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        parse_first(&results)
    }
}

fn parse_first(results: &[NominatimResult]) -> Result<Option<Coordinates>> {
    match results.first() {
        Some(result) => {
            let lat: f64 = result.lat.parse().context("Invalid latitude")?;
            let lng: f64 = result.lon.parse().context("Invalid longitude")?;
            Ok(Some(Coordinates { lat, lng }))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_url_encodes_address() {
        let client = NominatimClient::new("http://localhost:8080/");
        let url = client.search_url(" 1200 Larimer St, Denver ");
        assert_eq!(
            url,
            "http://localhost:8080/search?q=1200%20Larimer%20St%2C%20Denver&format=json&limit=1"
        );
    }

    #[test]
    fn test_parse_first_result() {
        let json = r#"[{"lat":"39.7475","lon":"-104.9994","display_name":"Larimer St"}]"#;
        let results: Vec<NominatimResult> = serde_json::from_str(json).unwrap();
        let coords = parse_first(&results).unwrap().unwrap();
        assert!((coords.lat - 39.7475).abs() < 1e-9);
        assert!((coords.lng + 104.9994).abs() < 1e-9);
    }

    #[test]
    fn test_parse_empty_result_is_not_found() {
        assert!(parse_first(&[]).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_bad_latitude() {
        let results = vec![NominatimResult {
            lat: "north".to_string(),
            lon: "0".to_string(),
            display_name: String::new(),
        }];
        assert!(parse_first(&results).is_err());
    }

    // Note: requires network access and hits the public Nominatim API
    #[tokio::test]
    #[ignore]
    async fn test_geocode_denver_union_station() {
        let client = NominatimClient::new("https://nominatim.openstreetmap.org");

        let coords = client
            .geocode("1701 Wynkoop St, Denver, CO")
            .await
            .unwrap()
            .unwrap();

        assert!((coords.lat - 39.75).abs() < 0.1);
        assert!((coords.lng + 105.0).abs() < 0.1);
    }
}
