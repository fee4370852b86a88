//! Queue service: publishing, worker lifecycle and inspection for one
//! queue identity.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fred::clients::Client as RedisClient;
use taskline_common::{FlowConfig, QueueConfig, QueueMetrics};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::envelope::Envelope;
use crate::error::QueueResult;
use crate::flow::{AdmissionGate, AllowAll, FlowKeys, build_gates};
use crate::naming::{QueueKeys, QueueNaming};
use crate::publisher::Publisher;
use crate::recovery;
use crate::registry::HandlerRegistry;
use crate::status::{QueueStatus, StatusReporter};
use crate::worker::{WorkerContext, WorkerPool};

/// A durable work queue bound to one queue identity.
///
/// Keys are resolved once at construction and stay fixed for the life of
/// the service. Dropping a running service lets its workers finish their
/// current envelope and exit; call [`stop`](Self::stop) to wait for that.
pub struct QueueService<B: QueueBackend> {
    config: QueueConfig,
    naming: QueueNaming,
    keys: QueueKeys,
    flow_keys: FlowKeys,
    backend: B,
    registry: Arc<HandlerRegistry>,
    inbound: Arc<dyn AdmissionGate>,
    outbound: Arc<dyn AdmissionGate>,
    metrics: Arc<QueueMetrics>,
    pool: Mutex<Option<WorkerPool>>,
    live: Arc<AtomicUsize>,
}

impl<B: QueueBackend> QueueService<B> {
    /// Create a stopped service. Both admission gates start disabled.
    #[must_use]
    pub fn new(config: QueueConfig, backend: B, registry: HandlerRegistry) -> Self {
        let naming = QueueNaming::from_config(&config);
        Self::with_naming(config, naming, backend, registry)
    }

    /// Create a stopped service with explicit naming.
    #[must_use]
    pub fn with_naming(
        config: QueueConfig,
        naming: QueueNaming,
        backend: B,
        registry: HandlerRegistry,
    ) -> Self {
        let keys = naming.keys();
        let flow_keys = FlowKeys::new(&naming, false);
        Self {
            config,
            naming,
            keys,
            flow_keys,
            backend,
            registry: Arc::new(registry),
            inbound: Arc::new(AllowAll),
            outbound: Arc::new(AllowAll),
            metrics: Arc::new(QueueMetrics::new()),
            pool: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Gate checked before every publish.
    #[must_use]
    pub fn with_inbound_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.inbound = gate;
        self
    }

    /// Gate checked before every handler invocation.
    #[must_use]
    pub fn with_outbound_gate(mut self, gate: Arc<dyn AdmissionGate>) -> Self {
        self.outbound = gate;
        self
    }

    /// Whether flow keys carry the server identity.
    #[must_use]
    pub fn with_flow_grouping(mut self, group_by_server: bool) -> Self {
        self.flow_keys = FlowKeys::new(&self.naming, group_by_server);
        self
    }

    /// Configure both gates and flow grouping from `config`.
    #[must_use]
    pub fn with_flow_config(self, config: &FlowConfig, redis: Option<&RedisClient>) -> Self {
        let (inbound, outbound) = build_gates(config, redis);
        self.with_inbound_gate(inbound)
            .with_outbound_gate(outbound)
            .with_flow_grouping(config.group_by_server)
    }

    /// A publishing handle that can be cloned into producers.
    #[must_use]
    pub fn publisher(&self) -> Publisher<B> {
        Publisher::new(
            self.backend.clone(),
            self.keys.pending.clone(),
            self.flow_keys.inbound.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.inbound),
            Arc::clone(&self.metrics),
        )
    }

    /// Publish `item` for asynchronous processing.
    ///
    /// See [`Publisher::publish`].
    pub async fn publish<T: Send + Sync + 'static>(&self, item: &T) -> QueueResult<bool> {
        self.publisher().publish(item).await
    }

    /// Start the workers.
    ///
    /// Envelopes left in flight by an earlier run go back to pending first.
    /// Does nothing if workers are already running.
    pub async fn start(&self) -> QueueResult<()> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            debug!(queue = %self.keys.pending, "Queue already started");
            return Ok(());
        }

        self.recover().await?;

        let ctx = Arc::new(WorkerContext {
            backend: self.backend.clone(),
            keys: self.keys.clone(),
            flow_key: self.flow_keys.outbound.clone(),
            registry: Arc::clone(&self.registry),
            gate: Arc::clone(&self.outbound),
            metrics: Arc::clone(&self.metrics),
            consume_timeout: self.config.consume_timeout(),
            failure_policy: self.config.failure_policy,
        });
        *pool = Some(WorkerPool::spawn(
            self.config.workers,
            &ctx,
            Arc::clone(&self.live),
        ));

        info!(
            queue = %self.keys.pending,
            workers = self.config.workers,
            handlers = self.registry.len(),
            "Queue started"
        );
        Ok(())
    }

    /// Stop the workers, waiting up to the configured shutdown timeout.
    ///
    /// Returns `false` if workers had to be aborted at the deadline; their
    /// claimed envelopes stay in flight until the next start. A later
    /// [`start`](Self::start) creates a fresh pool.
    pub async fn stop(&self) -> bool {
        let Some(pool) = self.pool.lock().await.take() else {
            return true;
        };

        let timeout = self.config.shutdown_timeout();
        let stopped = pool.shutdown(timeout).await;
        if stopped {
            info!(queue = %self.keys.pending, "Queue stopped");
        } else {
            warn!(
                queue = %self.keys.pending,
                timeout_secs = timeout.as_secs(),
                "Queue stop timed out"
            );
        }
        stopped
    }

    /// Whether any worker is still live.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live_workers() > 0
    }

    /// Number of workers that have not exited.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Move everything in flight back to pending. Returns how many moved.
    pub async fn recover(&self) -> QueueResult<u64> {
        let moved = recovery::drain(&self.backend, &self.keys.in_flight, &self.keys.pending).await?;
        QueueMetrics::add(&self.metrics.recovered, moved);
        Ok(moved)
    }

    /// Backlog of every queue identity on the backend.
    pub async fn status(&self) -> QueueResult<Vec<QueueStatus>> {
        StatusReporter::new(self.backend.clone()).status().await
    }

    /// Envelopes in the error list, newest first. Unreadable entries are
    /// skipped.
    pub async fn dead_letters(&self) -> QueueResult<Vec<Envelope>> {
        let raw = self.backend.range(&self.keys.error).await?;
        Ok(raw
            .iter()
            .filter_map(|entry| match Envelope::decode(entry) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    warn!(error = %e, envelope = %entry, "Skipping unreadable error-list entry");
                    None
                }
            })
            .collect())
    }

    /// Move the error list back to pending. Returns how many moved.
    pub async fn replay_dead_letters(&self) -> QueueResult<u64> {
        recovery::drain(&self.backend, &self.keys.error, &self.keys.pending).await
    }

    /// Length of the pending list.
    pub async fn pending_len(&self) -> QueueResult<u64> {
        self.backend.len(&self.keys.pending).await
    }

    /// Length of the in-flight list.
    pub async fn in_flight_len(&self) -> QueueResult<u64> {
        self.backend.len(&self.keys.in_flight).await
    }

    /// Length of the error list.
    pub async fn error_len(&self) -> QueueResult<u64> {
        self.backend.len(&self.keys.error).await
    }

    /// Pending list key.
    #[must_use]
    pub fn pending_key(&self) -> &str {
        &self.keys.pending
    }

    /// In-flight list key.
    #[must_use]
    pub fn in_flight_key(&self) -> &str {
        &self.keys.in_flight
    }

    /// Error list key.
    #[must_use]
    pub fn error_queue_key(&self) -> &str {
        &self.keys.error
    }

    /// Flow keys used by the admission gates.
    #[must_use]
    pub const fn flow_keys(&self) -> &FlowKeys {
        &self.flow_keys
    }

    /// Key naming of this queue.
    #[must_use]
    pub const fn naming(&self) -> &QueueNaming {
        &self.naming
    }

    /// Registered handlers.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Service counters.
    #[must_use]
    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }

    /// Configuration the service was built with.
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The backend shared by the publisher and the status reporter.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }
}
