use std::time::Duration;

use phantom_core::config::{active_profile, profiled_env_opt, profiled_env_or, profiled_env_parse};
use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PATH_PREFIX: &str = "data-phantom";

// ── EmrConfig ────────────────────────────────────────────────────

/// Configuration for the shared cluster and its step protocol.
///
/// Reads from environment variables with optional profile prefix.
/// When `PHANTOM_PROFILE=PROD`, checks `PROD_EMR_STACK_NAME` before `EMR_STACK_NAME`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmrConfig {
    pub region: String,
    /// Infrastructure stack that owns the cluster.
    pub stack_name: String,
    /// Logical id of the cluster resource inside the stack; also matched against cluster names.
    pub cluster_logical_id: String,
    /// Bucket for scripts, outputs and logs.
    pub output_bucket: String,
    /// Key prefix under the bucket.
    pub path_prefix: String,
    pub step_poll_interval_seconds: u64,
    pub step_poll_max_attempts: u32,
    pub cluster_poll_interval_seconds: u64,
    pub cluster_poll_max_attempts: u32,
    pub stack_poll_max_attempts: u32,
    /// How long an observed WAITING/RUNNING state is trusted without re-describing.
    pub cluster_handle_ttl_seconds: u64,
    pub retry: RetryPolicy,
}

impl EmrConfig {
    /// Build config from environment variables.
    ///
    /// `EMR_REGION` falls back to `AWS_REGION` before using the default.
    pub fn from_env() -> Self {
        Self::from_env_profiled(&active_profile())
    }

    /// Build config for a specific named profile.
    pub fn from_env_profiled(profile: &str) -> Self {
        let region = profiled_env_opt(profile, "EMR_REGION")
            .or_else(|| profiled_env_opt(profile, "AWS_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let d = RetryPolicy::default();

        Self {
            region,
            stack_name: profiled_env_or(profile, "EMR_STACK_NAME", ""),
            cluster_logical_id: profiled_env_or(profile, "EMR_CLUSTER_LOGICAL_ID", ""),
            output_bucket: profiled_env_or(profile, "EMR_OUTPUT_BUCKET", ""),
            path_prefix: profiled_env_or(profile, "EMR_PATH_PREFIX", DEFAULT_PATH_PREFIX),
            step_poll_interval_seconds: profiled_env_parse(profile, "EMR_STEP_POLL_INTERVAL_SECONDS", 30),
            step_poll_max_attempts: profiled_env_parse(profile, "EMR_STEP_POLL_MAX_ATTEMPTS", 2880),
            cluster_poll_interval_seconds: profiled_env_parse(
                profile,
                "EMR_CLUSTER_POLL_INTERVAL_SECONDS",
                30,
            ),
            cluster_poll_max_attempts: profiled_env_parse(profile, "EMR_CLUSTER_POLL_MAX_ATTEMPTS", 60),
            stack_poll_max_attempts: profiled_env_parse(profile, "EMR_STACK_POLL_MAX_ATTEMPTS", 60),
            cluster_handle_ttl_seconds: profiled_env_parse(profile, "EMR_CLUSTER_HANDLE_TTL_SECONDS", 30),
            retry: RetryPolicy {
                max_retries: profiled_env_parse(profile, "EMR_MAX_RETRIES", d.max_retries),
                base_delay_ms: profiled_env_parse(profile, "EMR_RETRY_BASE_DELAY_MS", d.base_delay_ms),
                max_delay_ms: profiled_env_parse(profile, "EMR_RETRY_MAX_DELAY_MS", d.max_delay_ms),
                backoff: profiled_env_parse(profile, "EMR_RETRY_BACKOFF", d.backoff),
            },
        }
    }

    /// Returns `true` when the stack and bucket have been set.
    pub fn is_configured(&self) -> bool {
        !self.stack_name.is_empty() && !self.output_bucket.is_empty()
    }

    pub fn step_poll_interval(&self) -> Duration {
        Duration::from_secs(self.step_poll_interval_seconds)
    }

    pub fn cluster_poll_interval(&self) -> Duration {
        Duration::from_secs(self.cluster_poll_interval_seconds)
    }

    pub fn cluster_handle_ttl(&self) -> Duration {
        Duration::from_secs(self.cluster_handle_ttl_seconds)
    }
}

// ── RetryPolicy ──────────────────────────────────────────────────

const JITTER_FACTOR: f64 = 0.1;
const MIN_DELAY_MS: u64 = 100;

/// Exponential backoff between whole submit+poll attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based), with random jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let unit: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        self.delay_with_jitter(retry, unit * JITTER_FACTOR)
    }

    /// Delay before retry number `retry` scaled by `1 + jitter`.
    pub fn delay_with_jitter(&self, retry: u32, jitter: f64) -> Duration {
        let exp = self.base_delay_ms as f64 * self.backoff.powi(retry as i32);
        let capped = exp.min(self.max_delay_ms as f64);
        let jittered = (capped * (1.0 + jitter)).min(self.max_delay_ms as f64);
        Duration::from_millis((jittered as u64).max(MIN_DELAY_MS))
    }
}

// ── Tests ────────────────────────────────────────────────────────
