//! Admission control for publishing and processing.
//!
//! Two independent gates protect the queue: the inbound gate is asked
//! before an envelope is published, the outbound gate right before a
//! claimed envelope is handed to its handler. Both are keyed by a flow
//! identifier `"<direction>.<queue>[.<server>]"`.

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use taskline_common::FlowConfig;

use crate::naming::QueueNaming;
use crate::rate_limit::{FlowRateLimiter, RateLimitConfig, RedisFlowLimiter};

/// Direction prefix of publish flows.
pub const INBOUND_PREFIX: &str = "inbound";

/// Direction prefix of processing flows.
pub const OUTBOUND_PREFIX: &str = "outbound";

/// Queue component used when queue names are disabled.
const DEFAULT_QUEUE: &str = "default";

/// A rate-limit check able to refuse an operation before it runs.
#[async_trait]
pub trait AdmissionGate: Send + Sync {
    /// Whether one more operation on `flow` may run now.
    async fn allow(&self, flow: &str) -> bool;
}

/// Gate that never refuses.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AdmissionGate for AllowAll {
    async fn allow(&self, _flow: &str) -> bool {
        true
    }
}

/// Flow identifiers of one queue identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowKeys {
    /// Key checked on publish.
    pub inbound: String,
    /// Key checked before processing.
    pub outbound: String,
}

impl FlowKeys {
    /// Derive flow keys from the queue naming.
    pub fn new(naming: &QueueNaming, group_by_server: bool) -> Self {
        let queue = naming.queue_name().unwrap_or(DEFAULT_QUEUE);
        let key = |direction: &str| {
            if group_by_server {
                format!("{direction}.{queue}.{}", naming.server_name())
            } else {
                format!("{direction}.{queue}")
            }
        };
        Self {
            inbound: key(INBOUND_PREFIX),
            outbound: key(OUTBOUND_PREFIX),
        }
    }
}

/// Build a gate from configuration.
///
/// A disabled gate allows everything. A distributed gate needs a Redis
/// client; without one it falls back to the in-process limiter.
pub fn build_gate(
    enabled: bool,
    config: &FlowConfig,
    redis: Option<&RedisClient>,
) -> Arc<dyn AdmissionGate> {
    if !enabled {
        return Arc::new(AllowAll);
    }
    let limits = RateLimitConfig::from(config);
    match redis {
        Some(client) if config.distributed => Arc::new(RedisFlowLimiter::new(client.clone(), limits)),
        _ => Arc::new(FlowRateLimiter::new(limits)),
    }
}

/// Build the inbound and outbound gates from configuration.
pub fn build_gates(
    config: &FlowConfig,
    redis: Option<&RedisClient>,
) -> (Arc<dyn AdmissionGate>, Arc<dyn AdmissionGate>) {
    (
        build_gate(config.inbound_enabled, config, redis),
        build_gate(config.outbound_enabled, config, redis),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_keys_per_queue() {
        let naming = QueueNaming::new("web-1", true, Some("orders".into()));
        let keys = FlowKeys::new(&naming, false);

        assert_eq!(keys.inbound, "inbound.orders");
        assert_eq!(keys.outbound, "outbound.orders");
    }

    #[test]
    fn test_flow_keys_grouped_by_server() {
        let naming = QueueNaming::new("web-1:8080", true, Some("orders".into()));
        let keys = FlowKeys::new(&naming, true);

        assert_eq!(keys.inbound, "inbound.orders.web-1:8080");
        assert_eq!(keys.outbound, "outbound.orders.web-1:8080");
    }

    #[test]
    fn test_flow_keys_without_queue_name() {
        let naming = QueueNaming::new("web-1", false, None);
        let keys = FlowKeys::new(&naming, false);

        assert_eq!(keys.inbound, "inbound.default");
    }

    #[tokio::test]
    async fn test_disabled_gate_allows() {
        let config = FlowConfig {
            max_requests: 0,
            ..FlowConfig::default()
        };
        let gate = build_gate(false, &config, None);

        assert!(gate.allow("inbound.orders").await);
    }

    #[tokio::test]
    async fn test_enabled_gate_limits() {
        let config = FlowConfig {
            max_requests: 2,
            window_secs: 60,
            ..FlowConfig::default()
        };
        let (inbound, outbound) = build_gates(
            &FlowConfig {
                inbound_enabled: true,
                ..config
            },
            None,
        );

        assert!(inbound.allow("inbound.orders").await);
        assert!(inbound.allow("inbound.orders").await);
        assert!(!inbound.allow("inbound.orders").await);

        // Outbound gate is disabled by default
        for _ in 0..5 {
            assert!(outbound.allow("outbound.orders").await);
        }
    }
}
