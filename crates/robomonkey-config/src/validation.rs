//! Configuration validation
//!
//! Rejects configurations that would corrupt data or hang the daemon at
//! runtime, so bad values fail at startup instead.

use crate::{ApplicationConfig, ConfigError, ConfigResult};

/// Validate a loaded configuration.
///
/// # Errors
///
/// Returns `ConfigError::Validation` naming the first offending field.
pub fn validate(config: &ApplicationConfig) -> ConfigResult<()> {
    if config.database.url.is_empty() {
        return Err(ConfigError::Validation("database.url is empty".into()));
    }
    if config.database.schema_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "database.schema_prefix is empty".into(),
        ));
    }
    if !config
        .database
        .schema_prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
    {
        return Err(ConfigError::Validation(
            "database.schema_prefix must start with a lowercase letter".into(),
        ));
    }
    if config.database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be > 0".into(),
        ));
    }

    if config.embeddings.dimension == 0 {
        return Err(ConfigError::Validation(
            "embeddings.dimension must be > 0".into(),
        ));
    }
    if config.embeddings.batch_size == 0 {
        return Err(ConfigError::Validation(
            "embeddings.batch_size must be > 0".into(),
        ));
    }
    if config.embeddings.max_embedding_chars == 0 {
        return Err(ConfigError::Validation(
            "embeddings.max_embedding_chars must be > 0".into(),
        ));
    }

    if config.indexing.max_chunk_chars == 0 {
        return Err(ConfigError::Validation(
            "indexing.max_chunk_chars must be > 0".into(),
        ));
    }
    if config.indexing.chunk_overlap_chars >= config.indexing.max_chunk_chars {
        return Err(ConfigError::Validation(
            "indexing.chunk_overlap_chars must be smaller than max_chunk_chars".into(),
        ));
    }

    if config.search.final_top_k == 0 {
        return Err(ConfigError::Validation(
            "search.final_top_k must be > 0".into(),
        ));
    }
    if config.search.graph_depth == 0 || config.search.graph_depth > 2 {
        return Err(ConfigError::Validation(
            "search.graph_depth must be 1 or 2".into(),
        ));
    }

    if config.daemon.global_max_concurrent == 0 {
        return Err(ConfigError::Validation(
            "daemon.global_max_concurrent must be > 0".into(),
        ));
    }
    if config.daemon.max_concurrent_per_repo == 0 {
        return Err(ConfigError::Validation(
            "daemon.max_concurrent_per_repo must be > 0".into(),
        ));
    }
    if config.daemon.dead_threshold_sec <= config.daemon.heartbeat_interval_sec {
        return Err(ConfigError::Validation(
            "daemon.dead_threshold_sec must exceed heartbeat_interval_sec".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_dimension() {
        let mut config = ApplicationConfig::default();
        config.embeddings.dimension = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_overlap_wider_than_window() {
        let mut config = ApplicationConfig::default();
        config.indexing.max_chunk_chars = 400;
        config.indexing.chunk_overlap_chars = 400;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_dead_threshold_below_heartbeat() {
        let mut config = ApplicationConfig::default();
        config.daemon.dead_threshold_sec = config.daemon.heartbeat_interval_sec;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_schema_prefix() {
        let mut config = ApplicationConfig::default();
        config.database.schema_prefix = "9bad_".into();
        assert!(validate(&config).is_err());
    }
}
