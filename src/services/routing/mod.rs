//! Routing service for travel-time matrices
//!
//! Uses Valhalla for production, a haversine estimate when Valhalla is not
//! configured or unhealthy.

mod matrix;
mod valhalla;

pub use matrix::{MatrixBuilder, TravelTimeMatrix, UNREACHABLE};
pub use valhalla::{ValhallaClient, ValhallaConfig};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::services::geo::{estimated_travel_seconds, AVERAGE_SPEED_KMH, ROAD_COEFFICIENT};
use crate::types::Coordinates;

/// Row-major travel seconds, `rows[source][target]`; `None` = unreachable.
pub type TravelTimeRows = Vec<Vec<Option<u64>>>;

/// Travel-time provider abstraction (Valhalla, mock, etc.)
#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Travel seconds from every source to every target.
    async fn travel_times(&self, sources: &[Coordinates], targets: &[Coordinates]) -> Result<TravelTimeRows>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Haversine × road coefficient at a fixed average speed
pub struct MockRoutingService {
    road_coefficient: f64,
    average_speed_kmh: f64,
}

impl Default for MockRoutingService {
    fn default() -> Self {
        Self {
            road_coefficient: ROAD_COEFFICIENT,
            average_speed_kmh: AVERAGE_SPEED_KMH,
        }
    }
}

impl MockRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
        }
    }
}

#[async_trait]
impl RoutingService for MockRoutingService {
    async fn travel_times(&self, sources: &[Coordinates], targets: &[Coordinates]) -> Result<TravelTimeRows> {
        Ok(sources
            .iter()
            .map(|from| {
                targets
                    .iter()
                    .map(|to| {
                        Some(estimated_travel_seconds(
                            from,
                            to,
                            self.road_coefficient,
                            self.average_speed_kmh,
                        ))
                    })
                    .collect()
            })
            .collect())
    }

    fn name(&self) -> &str {
        "MockRouting"
    }
}

/// Create routing service with automatic Valhalla detection and fallback
pub async fn create_routing_service_with_fallback(valhalla_url: Option<String>) -> Arc<dyn RoutingService> {
    if let Some(url) = valhalla_url {
        match check_valhalla_health(&url).await {
            Ok(()) => {
                info!("Valhalla routing service available at {}", url);
                return Arc::new(ValhallaClient::new(ValhallaConfig::new(&url)));
            }
            Err(e) => {
                warn!("Valhalla not available at {}: {}. Falling back to mock routing.", url, e);
            }
        }
    }

    info!("Using mock routing service (Valhalla not configured or unavailable)");
    Arc::new(MockRoutingService::new())
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Mock provider that records request shapes and can fail selected blocks
    #[derive(Default)]
    pub struct RecordingRouting {
        pub inner: MockRoutingService,
        pub requests: Mutex<Vec<(usize, usize)>>,
        /// Fail every request whose sources include this point
        pub fail_when_source: Option<Coordinates>,
        pub fail_all: bool,
    }

    impl RecordingRouting {
        pub fn failing() -> Self {
            Self { fail_all: true, ..Self::default() }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl RoutingService for RecordingRouting {
        async fn travel_times(&self, sources: &[Coordinates], targets: &[Coordinates]) -> Result<TravelTimeRows> {
            self.requests.lock().push((sources.len(), targets.len()));
            if self.fail_all {
                anyhow::bail!("scripted routing outage");
            }
            if let Some(bad) = self.fail_when_source {
                if sources.contains(&bad) {
                    anyhow::bail!("scripted block failure");
                }
            }
            self.inner.travel_times(sources, targets).await
        }

        fn name(&self) -> &str {
            "Recording"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downtown() -> Coordinates {
        Coordinates { lat: 39.7392, lng: -104.9903 }
    }

    fn boulder() -> Coordinates {
        Coordinates { lat: 40.0150, lng: -105.2705 }
    }

    #[tokio::test]
    async fn test_mock_routing_empty_locations() {
        let service = MockRoutingService::new();
        let rows = service.travel_times(&[], &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_mock_routing_rectangular_request() {
        let service = MockRoutingService::new();
        let rows = service
            .travel_times(&[downtown()], &[downtown(), boulder()])
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[0][0], Some(0));
    }

    #[tokio::test]
    async fn test_mock_routing_travel_time_reasonable() {
        let service = MockRoutingService::new();
        let rows = service.travel_times(&[downtown()], &[boulder()]).await.unwrap();

        // ~39 km straight, ~51 km road at 40 km/h = ~76 minutes
        let minutes = rows[0][0].unwrap() as f64 / 60.0;
        assert!(minutes > 60.0 && minutes < 90.0, "Expected ~76 minutes, got {}", minutes);
    }

    #[tokio::test]
    async fn test_mock_routing_custom_params_faster() {
        let slow = MockRoutingService::new();
        let fast = MockRoutingService::with_params(1.3, 80.0);
        let slow_s = slow.travel_times(&[downtown()], &[boulder()]).await.unwrap()[0][0].unwrap();
        let fast_s = fast.travel_times(&[downtown()], &[boulder()]).await.unwrap()[0][0].unwrap();
        assert!(fast_s < slow_s);
    }

    #[test]
    fn test_routing_service_name() {
        assert_eq!(MockRoutingService::new().name(), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_no_url() {
        let service = create_routing_service_with_fallback(None).await;
        assert_eq!(service.name(), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_unreachable_url() {
        let service = create_routing_service_with_fallback(Some("http://127.0.0.1:9".to_string())).await;
        assert_eq!(service.name(), "MockRouting");
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_create_routing_service_with_fallback_valhalla_available() {
        let service = create_routing_service_with_fallback(Some("http://localhost:8002".to_string())).await;
        assert_eq!(service.name(), "Valhalla");
    }
}
