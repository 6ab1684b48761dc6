//! Travel times from a Valhalla server's `sources_to_targets` endpoint
//!
//! https://valhalla.github.io/valhalla/api/matrix/api-reference/

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{RoutingService, TravelTimeRows};
use crate::types::Coordinates;

/// Crews drive vans; Valhalla's car costing is the closest profile
const COSTING: &str = "auto";

#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// e.g. "http://localhost:8002", without trailing slash
    pub base_url: String,
    pub timeout: Duration,
    /// How far Valhalla may snap a job location to the road network
    pub snap_radius_m: u32,
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
            snap_radius_m: 500,
        }
    }
}

pub struct ValhallaClient {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaClient {
    pub fn new(config: ValhallaConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn location(&self, point: &Coordinates) -> ValhallaLocation {
        ValhallaLocation {
            lat: point.lat,
            lon: point.lng,
            radius: Some(self.config.snap_radius_m).filter(|r| *r > 0),
        }
    }

    fn matrix_request(&self, sources: &[Coordinates], targets: &[Coordinates]) -> MatrixRequest {
        MatrixRequest {
            sources: sources.iter().map(|p| self.location(p)).collect(),
            targets: targets.iter().map(|p| self.location(p)).collect(),
            costing: COSTING,
        }
    }
}

#[async_trait]
impl RoutingService for ValhallaClient {
    async fn travel_times(&self, sources: &[Coordinates], targets: &[Coordinates]) -> Result<TravelTimeRows> {
        if sources.is_empty() || targets.is_empty() {
            return Ok(vec![Vec::new(); sources.len()]);
        }

        let request = self.matrix_request(sources, targets);
        debug!("Valhalla block {}x{}", sources.len(), targets.len());

        let response = self
            .client
            .post(format!("{}/sources_to_targets", self.config.base_url))
            .json(&request)
            .send()
            .await
            .context("Valhalla unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla answered {}: {}", status, body.trim());
        }

        let body: MatrixResponse = response.json().await.context("Unexpected Valhalla matrix body")?;
        let rows = body.into_rows();
        if rows.len() != sources.len() {
            anyhow::bail!("Valhalla returned {} rows for {} sources", rows.len(), sources.len());
        }
        Ok(rows)
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: &'static str,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

impl MatrixResponse {
    fn into_rows(self) -> TravelTimeRows {
        self.sources_to_targets
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| cell.time.filter(|t| t.is_finite() && *t >= 0.0).map(|t| t.round() as u64))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Time in seconds; null when no route exists
    time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denver() -> Coordinates {
        Coordinates::new(39.7392, -104.9903)
    }

    fn boulder() -> Coordinates {
        Coordinates::new(40.0150, -105.2705)
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let config = ValhallaConfig::new("http://valhalla:8002/");
        assert_eq!(config.base_url, "http://valhalla:8002");
        assert_eq!(config.snap_radius_m, 500);
    }

    #[test]
    fn request_keeps_rectangular_shape_and_lon_naming() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://localhost:8002"));

        let request = client.matrix_request(&[denver()], &[denver(), boulder()]);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["sources"].as_array().unwrap().len(), 1);
        assert_eq!(json["targets"].as_array().unwrap().len(), 2);
        assert_eq!(json["costing"], "auto");
        assert_eq!(json["targets"][1]["lon"], -105.2705);
        assert_eq!(json["targets"][1]["radius"], 500);
    }

    #[test]
    fn zero_snap_radius_is_omitted() {
        let mut config = ValhallaConfig::new("http://localhost:8002");
        config.snap_radius_m = 0;
        let client = ValhallaClient::new(config);

        let json = serde_json::to_value(client.matrix_request(&[denver()], &[boulder()])).unwrap();
        assert!(json["sources"][0].get("radius").is_none());
    }

    #[test]
    fn null_and_negative_cells_have_no_time() {
        let json = r#"{"sources_to_targets":[[{"time":0,"distance":0},{"time":null,"distance":null}],[{"time":612.4,"distance":8.1},{"time":-1}]]}"#;
        let response: MatrixResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.into_rows(), vec![vec![Some(0), None], vec![Some(612), None]]);
    }

    #[tokio::test]
    async fn empty_block_needs_no_request() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://127.0.0.1:9"));
        let rows = client.travel_times(&[denver()], &[]).await.unwrap();
        assert_eq!(rows, vec![Vec::<Option<u64>>::new()]);
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn denver_to_boulder_is_under_an_hour() {
        let client = ValhallaClient::new(ValhallaConfig::new("http://localhost:8002"));
        let points = vec![denver(), boulder()];

        let rows = client.travel_times(&points, &points).await.unwrap();

        let minutes = rows[0][1].unwrap() as f64 / 60.0;
        assert!(minutes > 25.0 && minutes < 70.0, "got {} minutes", minutes);
    }
}
