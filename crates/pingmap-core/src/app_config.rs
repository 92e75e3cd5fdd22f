use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Which key-value backend holds the cells.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres { database_url: String },
    Http { base_url: String, api_token: Option<String> },
}

impl std::fmt::Debug for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Memory => write!(f, "Memory"),
            StoreKind::Postgres { .. } => write!(f, "Postgres {{ database_url: [redacted] }}"),
            StoreKind::Http { base_url, api_token } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("api_token", &api_token.as_ref().map(|_| "[redacted]"))
                .finish(),
        }
    }
}

impl StoreKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StoreKind::Memory => "memory",
            StoreKind::Postgres { .. } => "postgres",
            StoreKind::Http { .. } => "http",
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub store: StoreKind,
    pub admin_token: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub kv_request_timeout_secs: u64,
    pub geohash_precision: usize,
    pub seen_cap: usize,
    pub max_buckets_per_request: usize,
    pub max_store_ops_per_request: usize,
    pub max_concurrent_merges: usize,
    pub max_cas_retries: u32,
    pub cas_backoff_base_ms: u64,
    pub request_timeout_ms: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("store", &self.store)
            .field(
                "admin_token",
                &self.admin_token.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("kv_request_timeout_secs", &self.kv_request_timeout_secs)
            .field("geohash_precision", &self.geohash_precision)
            .field("seen_cap", &self.seen_cap)
            .field("max_buckets_per_request", &self.max_buckets_per_request)
            .field(
                "max_store_ops_per_request",
                &self.max_store_ops_per_request,
            )
            .field("max_concurrent_merges", &self.max_concurrent_merges)
            .field("max_cas_retries", &self.max_cas_retries)
            .field("cas_backoff_base_ms", &self.cas_backoff_base_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}
