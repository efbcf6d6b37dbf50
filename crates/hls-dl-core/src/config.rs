//! Engine-owned tunables. Not persisted; constructed in-process by the embedder.

use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Backoff/retry policy for a single HTTP call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff_factor: 2.0 }
    }
}

impl RetryPolicy {
    /// Delay before the attempt after `attempt` (0-based), i.e. `backoff_factor^(attempt+1)` seconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = self.backoff_factor.powi(attempt as i32 + 1);
        Duration::from_secs_f64(secs)
    }
}

/// HTTP client configuration shared by every fetch in the process.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub danger_accept_invalid_certs: bool,
    pub pool_max_idle_per_host: usize,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            danger_accept_invalid_certs: false,
            pool_max_idle_per_host: 32,
        }
    }
}

/// The engine's own concurrency/behavioural tunables for one process run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub segment_concurrency: usize,
    pub episode_concurrency: usize,
    pub script_eval_timeout: Duration,
    pub muxer_binary: Option<String>,
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpConfig::new(base_url),
            segment_concurrency: 50,
            episode_concurrency: 2,
            script_eval_timeout: Duration::from_secs(5),
            muxer_binary: None,
        }
    }

    /// Minimum pool size so no episode/segment combination starves the connection pool.
    pub fn recommended_pool_size(&self) -> usize {
        self.episode_concurrency * self.segment_concurrency
    }
}
