//! Geocoding abstraction layer with safety features
//!
//! - `MockGeocoder` for tests and development (deterministic, no network)
//! - `RateLimitedNominatimGeocoder` for production (rate limit + circuit breaker)
//! - `GeocodeCache` / `CachedGeocoder`: process-wide, append-only address cache
//!   that also remembers negative results
//!
//! Configuration via GEOCODER_BACKEND env variable:
//! - "mock" → MockGeocoder
//! - "nominatim" → RateLimitedNominatimGeocoder

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::services::nominatim::NominatimClient;
use crate::types::{normalize_address, Coordinates};

/// Geocoder trait - abstraction for all geocoding implementations
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a free-text address. `Ok(None)` = the provider found nothing.
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>>;

    /// Get the name of this geocoder implementation
    fn name(&self) -> &'static str;
}

// ==========================================================================
// MockGeocoder Implementation
// ==========================================================================

/// Mock geocoder - returns deterministic fake coordinates
pub struct MockGeocoder;

impl MockGeocoder {
    pub fn new() -> Self {
        Self
    }

    /// Generate deterministic coordinates from the normalized address hash,
    /// inside the Denver metro service area.
    fn hash_to_coordinates(address: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        normalize_address(address).hash(&mut hasher);
        let hash = hasher.finish();

        const LAT_MIN: f64 = 39.55;
        const LAT_MAX: f64 = 39.95;
        const LNG_MIN: f64 = -105.15;
        const LNG_MAX: f64 = -104.75;

        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFF_FFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: LAT_MIN + lat_normalized * (LAT_MAX - LAT_MIN),
            lng: LNG_MIN + lng_normalized * (LNG_MAX - LNG_MIN),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        if address.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::hash_to_coordinates(address)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// RateLimiter Implementation
// ==========================================================================

/// Rate limiter that enforces minimum interval between calls
pub struct RateLimiter {
    last_call: tokio::sync::Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: tokio::sync::Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                // Holding the lock while sleeping serializes concurrent callers
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: Mutex::new(None),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            // Recovery time passed: half-open, allow a retry
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// RateLimitedNominatimGeocoder Implementation
// ==========================================================================

/// Default rate limit interval (1.5 seconds - Nominatim allows 1 req/s)
const DEFAULT_RATE_LIMIT_MS: u64 = 1500;

/// Default circuit breaker threshold (3 failures)
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default circuit breaker recovery time (5 minutes)
const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Nominatim geocoder with rate limiting and circuit breaker protection
pub struct RateLimitedNominatimGeocoder {
    client: NominatimClient,
    rate_limiter: RateLimiter,
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl RateLimitedNominatimGeocoder {
    pub fn new(base_url: &str) -> Self {
        Self::with_config(
            base_url,
            Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
        )
    }

    pub fn with_config(
        base_url: &str,
        rate_limit_interval: Duration,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Self {
        Self {
            client: NominatimClient::new(base_url),
            rate_limiter: RateLimiter::new(rate_limit_interval),
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        }
    }
}

#[async_trait]
impl Geocoder for RateLimitedNominatimGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        if self.circuit_breaker.is_open() {
            warn!("Circuit breaker is open, rejecting geocoding request");
            return Err(DispatchError::CircuitOpen("geocoding").into());
        }

        self.rate_limiter.wait().await;

        match self.client.geocode(address).await {
            Ok(found) => {
                // "Not found" is an answer, not a failure
                self.circuit_breaker.record_success();
                Ok(found)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                warn!("Geocoding failed: {}", e);
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// Geocode cache
// ==========================================================================

/// Process-wide address cache: normalized address -> coordinate or not-found.
///
/// Append-only; addresses do not move, so entries are never invalidated.
/// Construct once per process and share it; tests build a fresh one.
#[derive(Default)]
pub struct GeocodeCache {
    entries: RwLock<HashMap<String, Option<Coordinates>>>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(Some(_))` hit, `Some(None)` cached not-found, `None` miss.
    pub fn get(&self, address: &str) -> Option<Option<Coordinates>> {
        self.entries.read().get(&normalize_address(address)).copied()
    }

    /// First write for a key wins.
    pub fn insert(&self, address: &str, coordinates: Option<Coordinates>) {
        self.entries
            .write()
            .entry(normalize_address(address))
            .or_insert(coordinates);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a cached lookup
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
    /// Provider failed; nothing was cached so a later lookup retries
    Unavailable(String),
}

impl GeocodeOutcome {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self {
            GeocodeOutcome::Found(c) => Some(*c),
            _ => None,
        }
    }
}

/// Geocoder fronted by the shared cache
#[derive(Clone)]
pub struct CachedGeocoder {
    inner: Arc<dyn Geocoder>,
    cache: Arc<GeocodeCache>,
}

impl CachedGeocoder {
    pub fn new(inner: Arc<dyn Geocoder>, cache: Arc<GeocodeCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    pub async fn resolve(&self, address: &str) -> GeocodeOutcome {
        if normalize_address(address).is_empty() {
            return GeocodeOutcome::NotFound;
        }

        if let Some(cached) = self.cache.get(address) {
            debug!("Geocode cache hit for '{}'", address);
            return cached.map_or(GeocodeOutcome::NotFound, GeocodeOutcome::Found);
        }

        match self.inner.geocode(address).await {
            Ok(found) => {
                self.cache.insert(address, found);
                found.map_or(GeocodeOutcome::NotFound, GeocodeOutcome::Found)
            }
            Err(e) => {
                warn!("{} geocoder unavailable for '{}': {}", self.inner.name(), address, e);
                GeocodeOutcome::Unavailable(e.to_string())
            }
        }
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Create geocoder based on backend name ("mock" or "nominatim")
pub fn create_geocoder(backend: &str, nominatim_url: &str) -> Arc<dyn Geocoder> {
    match backend {
        "mock" => {
            tracing::info!("Using MockGeocoder");
            Arc::new(MockGeocoder::new())
        }
        "nominatim" => {
            tracing::info!("Using RateLimitedNominatimGeocoder at {}", nominatim_url);
            Arc::new(RateLimitedNominatimGeocoder::new(nominatim_url))
        }
        _ => {
            warn!("Unknown GEOCODER_BACKEND '{}', using mock", backend);
            Arc::new(MockGeocoder::new())
        }
    }
}
