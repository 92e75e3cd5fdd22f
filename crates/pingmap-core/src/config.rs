use crate::app_config::{AppConfig, Environment, StoreKind};
use crate::geohash::MAX_PRECISION;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Parsing and validation over an arbitrary lookup, so tests can feed a
/// `HashMap` instead of mutating the process environment.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize_in = |var: &str,
                          default: &str,
                          range: std::ops::RangeInclusive<usize>|
     -> Result<usize, ConfigError> {
        let value = or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if range.contains(&value) {
            Ok(value)
        } else {
            Err(invalid(
                var,
                format!(
                    "must be between {} and {}, got {value}",
                    range.start(),
                    range.end()
                ),
            ))
        }
    };

    let env = parse_environment(&or_default("PINGMAP_ENV", "development"));
    let bind_addr = parse_addr("PINGMAP_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("PINGMAP_LOG_LEVEL", "info");

    let store = match or_default("PINGMAP_STORE", "memory").as_str() {
        "memory" => StoreKind::Memory,
        "postgres" => StoreKind::Postgres {
            database_url: require("DATABASE_URL")?,
        },
        "http" => StoreKind::Http {
            base_url: require("PINGMAP_KV_BASE_URL")?,
            api_token: lookup("PINGMAP_KV_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        },
        other => {
            return Err(invalid(
                "PINGMAP_STORE",
                format!("expected memory, postgres or http, got {other:?}"),
            ))
        }
    };

    let admin_token = lookup("PINGMAP_ADMIN_TOKEN")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let db_max_connections = parse_u32("PINGMAP_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("PINGMAP_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("PINGMAP_DB_ACQUIRE_TIMEOUT_SECS", "10")?;
    let kv_request_timeout_secs = parse_u64("PINGMAP_KV_REQUEST_TIMEOUT_SECS", "10")?;

    let geohash_precision = parse_usize_in("PINGMAP_GEOHASH_PRECISION", "7", 1..=MAX_PRECISION)?;
    let seen_cap = parse_usize_in("PINGMAP_SEEN_CAP", "150", 1..=usize::MAX)?;
    let max_buckets_per_request =
        parse_usize_in("PINGMAP_MAX_BUCKETS_PER_REQUEST", "500", 1..=usize::MAX)?;
    let max_store_ops_per_request =
        parse_usize_in("PINGMAP_MAX_STORE_OPS_PER_REQUEST", "1000", 2..=usize::MAX)?;
    let max_concurrent_merges =
        parse_usize_in("PINGMAP_MAX_CONCURRENT_MERGES", "16", 1..=usize::MAX)?;
    let max_cas_retries = parse_u32("PINGMAP_MAX_CAS_RETRIES", "3")?;
    let cas_backoff_base_ms = parse_u64("PINGMAP_CAS_BACKOFF_BASE_MS", "20")?;
    let request_timeout_ms = parse_u64("PINGMAP_REQUEST_TIMEOUT_MS", "10000")?;

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        store,
        admin_token,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        kv_request_timeout_secs,
        geohash_precision,
        seen_cap,
        max_buckets_per_request,
        max_store_ops_per_request,
        max_concurrent_merges,
        max_cas_retries,
        cas_backoff_base_ms,
        request_timeout_ms,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}
