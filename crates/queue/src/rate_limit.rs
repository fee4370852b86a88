//! Rate limiters backing the admission gates.
//!
//! [`FlowRateLimiter`] counts per process; [`RedisFlowLimiter`] counts in
//! Redis so every process sharing the instance shares the budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use taskline_common::FlowConfig;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::QueueResult;
use crate::flow::AdmissionGate;

/// Key prefix of the Redis window counters.
const REDIS_COUNTER_PREFIX: &str = "taskline:flow";

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum operations per window.
    pub max_requests: u32,
    /// Time window duration.
    pub window: Duration,
    /// Cooldown period after hitting the limit. Zero disables cooldown.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window: Duration::from_secs(1),
            cooldown: Duration::ZERO,
        }
    }
}

impl From<&FlowConfig> for RateLimitConfig {
    fn from(config: &FlowConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs.max(1)),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

/// Rate limit state for a single flow.
#[derive(Debug, Clone)]
struct FlowState {
    /// Operation count in current window.
    count: u32,
    /// Window start time.
    window_start: Instant,
    /// Cooldown end time (if in cooldown).
    cooldown_until: Option<Instant>,
}

impl FlowState {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
            cooldown_until: None,
        }
    }
}

/// Rate limit check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Operation is allowed.
    Allowed,
    /// Window budget exhausted.
    Limited {
        /// Seconds until the window resets.
        retry_after: u64,
    },
    /// Flow is in cooldown.
    Cooldown {
        /// Seconds until cooldown ends.
        retry_after: u64,
    },
}

/// Per-flow, in-process rate limiter.
#[derive(Clone)]
pub struct FlowRateLimiter {
    config: RateLimitConfig,
    states: Arc<RwLock<HashMap<String, FlowState>>>,
}

impl FlowRateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Check if one more operation on the given flow is allowed.
    pub async fn check(&self, flow: &str) -> RateLimitResult {
        let mut states = self.states.write().await;
        let now = Instant::now();

        let state = states
            .entry(flow.to_string())
            .or_insert_with(FlowState::new);

        // Check if in cooldown
        if let Some(cooldown_until) = state.cooldown_until {
            if now < cooldown_until {
                let retry_after = cooldown_until.duration_since(now).as_secs();
                return RateLimitResult::Cooldown { retry_after };
            }
            // Cooldown expired, reset state
            state.cooldown_until = None;
            state.count = 0;
            state.window_start = now;
        }

        // Check if window has expired
        if now.duration_since(state.window_start) >= self.config.window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.config.max_requests {
            if self.config.cooldown.is_zero() {
                let retry_after = self
                    .config
                    .window
                    .saturating_sub(now.duration_since(state.window_start))
                    .as_secs();
                return RateLimitResult::Limited { retry_after };
            }
            state.cooldown_until = Some(now + self.config.cooldown);
            return RateLimitResult::Cooldown {
                retry_after: self.config.cooldown.as_secs(),
            };
        }

        state.count += 1;
        RateLimitResult::Allowed
    }
}

#[async_trait]
impl AdmissionGate for FlowRateLimiter {
    async fn allow(&self, flow: &str) -> bool {
        match self.check(flow).await {
            RateLimitResult::Allowed => true,
            result => {
                debug!(flow, ?result, "Flow refused by local limiter");
                false
            }
        }
    }
}

/// Fixed-window limiter counting in Redis.
#[derive(Clone)]
pub struct RedisFlowLimiter {
    redis: RedisClient,
    window_secs: i64,
    max_requests: u64,
}

impl RedisFlowLimiter {
    /// Create a limiter sharing its counters through Redis.
    #[must_use]
    pub fn new(redis: RedisClient, config: RateLimitConfig) -> Self {
        Self {
            redis,
            window_secs: config.window.as_secs().max(1) as i64,
            max_requests: u64::from(config.max_requests),
        }
    }

    fn counter_key(&self, flow: &str) -> String {
        let window = current_window(self.window_secs);
        format!("{REDIS_COUNTER_PREFIX}:{flow}:{window}")
    }

    /// Count one operation on the flow and return the count in this window.
    pub async fn record(&self, flow: &str) -> QueueResult<u64> {
        let key = self.counter_key(flow);

        let count: u64 = self.redis.incr(key.clone()).await?;

        // Set expiry on first increment
        if count == 1 {
            self.redis
                .expire::<(), _>(key, self.window_secs, None)
                .await?;
        }

        Ok(count)
    }
}

#[async_trait]
impl AdmissionGate for RedisFlowLimiter {
    async fn allow(&self, flow: &str) -> bool {
        match self.record(flow).await {
            Ok(count) if count > self.max_requests => {
                debug!(flow, count, limit = self.max_requests, "Flow refused by Redis limiter");
                false
            }
            Ok(_) => true,
            Err(e) => {
                // Fail open: admission control must not stop the queue
                warn!(flow, error = %e, "Flow counter unavailable, allowing");
                true
            }
        }
    }
}

fn current_window(window_secs: i64) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64);
    now / window_secs
}
