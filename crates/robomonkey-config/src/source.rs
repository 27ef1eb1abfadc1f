//! Environment variable overrides
//!
//! Every knob in [`crate::ApplicationConfig`] can be overridden by a
//! `ROBOMONKEY_*` environment variable. Unset variables leave the default
//! in place; set-but-unparseable variables are hard errors rather than
//! silent fallbacks.

use crate::{ApplicationConfig, ConfigError, ConfigResult};

fn env_string(key: &str, target: &mut String) {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
    {
        *target = value;
    }
}

fn env_opt_string(key: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
    {
        *target = Some(value);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) -> ConfigResult<()> {
    if let Ok(value) = std::env::var(key)
        && !value.is_empty()
    {
        *target = value
            .parse()
            .map_err(|_| ConfigError::invalid(key, &value, "failed to parse"))?;
    }
    Ok(())
}

/// Apply `ROBOMONKEY_*` environment overrides on top of `config`.
///
/// # Errors
///
/// Returns an error if a set variable fails to parse into its target type.
pub fn apply_env_overrides(mut config: ApplicationConfig) -> ConfigResult<ApplicationConfig> {
    // Database
    env_string("ROBOMONKEY_DATABASE_URL", &mut config.database.url);
    env_string("ROBOMONKEY_SCHEMA_PREFIX", &mut config.database.schema_prefix);
    env_parse(
        "ROBOMONKEY_DB_MAX_CONNECTIONS",
        &mut config.database.max_connections,
    )?;
    env_parse(
        "ROBOMONKEY_DB_TIMEOUT_SECONDS",
        &mut config.database.timeout_seconds,
    )?;

    // Embeddings
    env_parse(
        "ROBOMONKEY_EMBEDDINGS_PROVIDER",
        &mut config.embeddings.provider,
    )?;
    env_string("ROBOMONKEY_EMBEDDINGS_MODEL", &mut config.embeddings.model);
    env_string(
        "ROBOMONKEY_EMBEDDINGS_BASE_URL",
        &mut config.embeddings.base_url,
    );
    env_parse(
        "ROBOMONKEY_EMBEDDINGS_DIMENSION",
        &mut config.embeddings.dimension,
    )?;
    env_opt_string(
        "ROBOMONKEY_EMBEDDINGS_API_KEY",
        &mut config.embeddings.api_key,
    );
    env_parse(
        "ROBOMONKEY_EMBEDDING_BATCH_SIZE",
        &mut config.embeddings.batch_size,
    )?;
    env_parse(
        "ROBOMONKEY_MAX_EMBEDDING_CHARS",
        &mut config.embeddings.max_embedding_chars,
    )?;
    env_parse(
        "ROBOMONKEY_EMBEDDING_TIMEOUT_SECONDS",
        &mut config.embeddings.timeout_seconds,
    )?;

    // Indexing
    env_parse(
        "ROBOMONKEY_MAX_CHUNK_CHARS",
        &mut config.indexing.max_chunk_chars,
    )?;
    env_parse(
        "ROBOMONKEY_CHUNK_OVERLAP_CHARS",
        &mut config.indexing.chunk_overlap_chars,
    )?;
    env_parse(
        "ROBOMONKEY_MAX_FILE_BYTES",
        &mut config.indexing.max_file_bytes,
    )?;

    // Search
    env_parse("ROBOMONKEY_VECTOR_TOP_K", &mut config.search.vector_top_k)?;
    env_parse("ROBOMONKEY_FTS_TOP_K", &mut config.search.fts_top_k)?;
    env_parse("ROBOMONKEY_FINAL_TOP_K", &mut config.search.final_top_k)?;
    env_parse(
        "ROBOMONKEY_CONTEXT_BUDGET_TOKENS",
        &mut config.search.context_budget_tokens,
    )?;
    env_parse("ROBOMONKEY_GRAPH_DEPTH", &mut config.search.graph_depth)?;

    // Daemon
    env_parse(
        "ROBOMONKEY_GLOBAL_MAX_CONCURRENT",
        &mut config.daemon.global_max_concurrent,
    )?;
    env_parse(
        "ROBOMONKEY_MAX_CONCURRENT_PER_REPO",
        &mut config.daemon.max_concurrent_per_repo,
    )?;
    env_parse(
        "ROBOMONKEY_POLL_INTERVAL_SEC",
        &mut config.daemon.poll_interval_sec,
    )?;
    env_parse(
        "ROBOMONKEY_HEARTBEAT_INTERVAL_SEC",
        &mut config.daemon.heartbeat_interval_sec,
    )?;
    env_parse(
        "ROBOMONKEY_DEAD_THRESHOLD_SEC",
        &mut config.daemon.dead_threshold_sec,
    )?;
    env_parse(
        "ROBOMONKEY_RETENTION_DAYS",
        &mut config.daemon.retention_days,
    )?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test to avoid
    // interleaving with parallel test threads.
    #[test]
    fn test_env_overrides_apply_and_fail_loudly() {
        unsafe {
            std::env::set_var("ROBOMONKEY_VECTOR_TOP_K", "55");
            std::env::set_var("ROBOMONKEY_SCHEMA_PREFIX", "rm_test_");
        }
        let config = apply_env_overrides(ApplicationConfig::default()).unwrap();
        assert_eq!(config.search.vector_top_k, 55);
        assert_eq!(config.database.schema_prefix, "rm_test_");

        unsafe {
            std::env::set_var("ROBOMONKEY_VECTOR_TOP_K", "not-a-number");
        }
        let err = apply_env_overrides(ApplicationConfig::default());
        assert!(err.is_err(), "garbage override must not be ignored");

        unsafe {
            std::env::remove_var("ROBOMONKEY_VECTOR_TOP_K");
            std::env::remove_var("ROBOMONKEY_SCHEMA_PREFIX");
        }
    }
}
