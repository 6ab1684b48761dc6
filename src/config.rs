//! Configuration management

use std::path::PathBuf;

use crate::defaults;
use crate::error::{DispatchError, DispatchResult};
use crate::services::placement::DayWindow;
use crate::types::Coordinates;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string (optional, falls back to JSON files)
    pub database_url: Option<String>,

    /// Directory for the file-backed schedule repository
    pub data_dir: PathBuf,

    /// Nominatim API URL (for geocoding)
    pub nominatim_url: String,

    /// Geocoder backend name: "mock" or "nominatim"
    pub geocoder_backend: String,

    /// Valhalla routing engine URL (optional, falls back to mock if unavailable)
    pub valhalla_url: Option<String>,

    /// Home shop every crew route starts and ends at
    pub depot: Coordinates,

    /// Opening/closing boundary and grid granularity
    pub day_window: DayWindow,

    /// Persistence quiet period in milliseconds
    pub persist_debounce_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> DispatchResult<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let nominatim_url = std::env::var("NOMINATIM_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());

        let geocoder_backend = std::env::var("GEOCODER_BACKEND")
            .unwrap_or_else(|_| "mock".to_string());

        let valhalla_url = std::env::var("VALHALLA_URL").ok();

        let fallback_depot = defaults::default_depot();
        let depot = Coordinates {
            lat: parse_env("DEPOT_LAT", fallback_depot.lat)?,
            lng: parse_env("DEPOT_LNG", fallback_depot.lng)?,
        };

        let day_window = DayWindow {
            open_hour: parse_env("DAY_START_HOUR", defaults::DEFAULT_DAY_START_HOUR)?,
            close_hour: parse_env("DAY_END_HOUR", defaults::DEFAULT_DAY_END_HOUR)?,
            slot_minutes: parse_env("SLOT_MINUTES", defaults::DEFAULT_SLOT_MINUTES)?,
        };
        day_window.validate()?;

        let persist_debounce_ms = parse_env("PERSIST_DEBOUNCE_MS", defaults::PERSIST_DEBOUNCE_MS)?;

        Ok(Self {
            database_url,
            data_dir,
            nominatim_url,
            geocoder_backend,
            valhalla_url,
            depot,
            day_window,
            persist_debounce_ms,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> DispatchResult<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| DispatchError::InvalidConfig(format!("{} has invalid value '{}'", name, raw))),
        _ => Ok(default),
    }
}
