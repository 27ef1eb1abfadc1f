//! Tracing bootstrap and correlation IDs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID type for tracking operations across service boundaries
///
/// Uses UUID v4 for guaranteed uniqueness across distributed systems
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new correlation ID using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Uuid::try_parse(id).map_or_else(|_| Self(Uuid::new_v4()), Self)
    }
}

/// Install the global tracing subscriber.
///
/// Writes to stderr so the stdio RPC channel on stdout stays clean.
/// Filtering follows `RUST_LOG`, defaulting to `info` for robomonkey
/// crates and `warn` for everything else.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,robomonkey=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_roundtrip() {
        let id = CorrelationId::new();
        let text = id.to_string();
        let parsed = CorrelationId::from(text.as_str());
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_correlation_id_from_garbage_makes_fresh() {
        let parsed = CorrelationId::from("not-a-uuid");
        // A fresh v4 is generated rather than failing
        assert_ne!(parsed.to_string(), "not-a-uuid");
    }
}
