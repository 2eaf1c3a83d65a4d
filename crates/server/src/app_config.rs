//! Configuration loading and tracing setup for the daemon.

use phantom_core::config::{load_dotenv, profiled_env_opt};
use phantom_core::Config;
use phantom_emr::EmrConfig;
use tracing::info;

/// Everything the daemon reads from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub core: Config,
    pub emr: EmrConfig,
    /// Database SQL tasks run against; the metadata database when unset.
    pub sql_target_url: Option<String>,
}

impl AppConfig {
    fn for_profile(profile: &str) -> Self {
        Self {
            core: Config::for_profile(profile),
            emr: EmrConfig::from_env_profiled(&profile.to_uppercase()),
            sql_target_url: profiled_env_opt(&profile.to_uppercase(), "SQL_TARGET_URL"),
        }
    }

    pub fn log_summary(&self) {
        self.core.log_summary();
        let e = &self.emr;
        info!(
            "  emr:         region={}, stack={}, bucket={}, prefix={}",
            e.region, e.stack_name, e.output_bucket, e.path_prefix
        );
        info!(
            "  sql target:  {}",
            if self.sql_target_url.is_some() { "dedicated" } else { "metadata database" }
        );
    }
}

/// Load configuration from `.env` and environment variables.
pub fn load_config() -> AppConfig {
    load_dotenv();
    AppConfig::for_profile(&phantom_core::config::active_profile())
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
