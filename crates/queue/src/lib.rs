//! Durable work queue on Redis lists.
//!
//! Producers publish typed payloads; a pool of workers claims them, hands
//! each to the handler registered for its type and acknowledges it once the
//! handler returns:
//!
//! - **Naming**: per-identity keys for the pending, in-flight and error lists
//! - **Registry**: handlers registered under an explicit type name
//! - **Publisher**: inbound admission check, then push onto pending
//! - **Workers**: claim, process, acknowledge or release
//! - **Recovery**: in-flight envelopes return to pending before workers start
//! - **Flow control**: independent inbound and outbound rate limits
//! - **Status**: backlog of every queue identity sharing the Redis instance

pub mod backend;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod naming;
pub mod publisher;
pub mod rate_limit;
pub mod recovery;
pub mod registry;
pub mod service;
pub mod status;
mod worker;

pub use backend::{ListEnd, MemoryBackend, QueueBackend, RedisBackend};
pub use envelope::Envelope;
pub use error::{HandlerError, QueueError, QueueResult};
pub use flow::{AdmissionGate, AllowAll, FlowKeys, build_gate, build_gates};
pub use naming::{ERROR_PREFIX, IN_FLIGHT_PREFIX, PENDING_PREFIX, QueueKeys, QueueNaming};
pub use publisher::Publisher;
pub use rate_limit::{FlowRateLimiter, RateLimitConfig, RateLimitResult, RedisFlowLimiter};
pub use registry::{Handler, HandlerRegistry, RegisteredHandler};
pub use service::QueueService;
pub use status::{QueueStatus, StatusReporter};
pub use taskline_common::{FailurePolicy, MetricsSnapshot, QueueMetrics};
