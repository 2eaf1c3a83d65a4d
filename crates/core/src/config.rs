use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
pub fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

pub fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

/// Parse a profiled env var, falling back to `default` when absent or unparsable.
pub fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Active profile from `PHANTOM_PROFILE`, upper-cased (empty = default).
pub fn active_profile() -> String {
    env_or("PHANTOM_PROFILE", "").to_uppercase()
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub concurrency: ConcurrencyConfig,
    pub postgres: PostgresConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PHANTOM_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::for_profile(&active_profile())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            concurrency: ConcurrencyConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let c = &self.concurrency;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  concurrency: adhoc_pool={}, scheduled_pool={}, sleep_slice={}ms, grace={}ms, min_spacing={}ms",
            c.adhoc_pool_size,
            c.scheduled_pool_size,
            c.scheduler_sleep_ms,
            c.execution_grace_period_ms,
            c.max_execution_frequency_ms,
        );
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
    }
}

// ── Concurrency / scheduling ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Concurrent ad-hoc runs.
    pub adhoc_pool_size: usize,
    /// Concurrent scheduled and recovery runs.
    pub scheduled_pool_size: usize,
    /// Longest single sleep of the scheduler loop.
    pub scheduler_sleep_ms: u64,
    /// How late a fire may be and still be dispatched.
    pub execution_grace_period_ms: u64,
    /// Minimum spacing between two scheduled runs of one playground.
    pub max_execution_frequency_ms: u64,
    /// Coordinator tick of a playground run.
    pub run_tick_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            adhoc_pool_size: 4,
            scheduled_pool_size: 4,
            scheduler_sleep_ms: 60_000,
            execution_grace_period_ms: 300_000,
            max_execution_frequency_ms: 60_000,
            run_tick_ms: 1_000,
        }
    }
}

impl ConcurrencyConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            adhoc_pool_size: profiled_env_parse(p, "ADHOC_POOL_SIZE", d.adhoc_pool_size).max(1),
            scheduled_pool_size: profiled_env_parse(p, "SCHEDULED_POOL_SIZE", d.scheduled_pool_size).max(1),
            scheduler_sleep_ms: profiled_env_parse(p, "SCHEDULER_SLEEP_MS", d.scheduler_sleep_ms),
            execution_grace_period_ms: profiled_env_parse(
                p,
                "EXECUTION_GRACE_PERIOD_MS",
                d.execution_grace_period_ms,
            ),
            max_execution_frequency_ms: profiled_env_parse(
                p,
                "MAX_EXECUTION_FREQUENCY_MS",
                d.max_execution_frequency_ms,
            ),
            run_tick_ms: profiled_env_parse(p, "RUN_TICK_MS", d.run_tick_ms).max(1),
        }
    }

    pub fn scheduler_sleep(&self) -> Duration {
        Duration::from_millis(self.scheduler_sleep_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.execution_grace_period_ms)
    }

    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.max_execution_frequency_ms)
    }

    pub fn run_tick(&self) -> Duration {
        Duration::from_millis(self.run_tick_ms)
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "phantom"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}
