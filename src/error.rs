//! Error types shared across the engine

use thiserror::Error;

/// Errors surfaced at library boundaries.
///
/// Provider failures are usually absorbed (degraded matrix, negative geocode)
/// and only reach callers through this type when a caller asks a provider
/// directly.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("{0} temporarily unavailable (circuit breaker open)")]
    CircuitOpen(&'static str),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("unknown lane: {0}")]
    UnknownLane(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl DispatchError {
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_names_the_provider() {
        let err = DispatchError::provider("Valhalla", "connection refused");
        assert_eq!(err.to_string(), "provider Valhalla failed: connection refused");
    }

    #[test]
    fn circuit_open_message() {
        let err = DispatchError::CircuitOpen("geocoding");
        assert!(err.to_string().contains("circuit breaker open"));
    }
}
