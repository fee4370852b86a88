//! Worker tasks.
//!
//! Each worker owns a dedicated backend handle and loops: claim the oldest
//! pending envelope into the in-flight list, process it, then acknowledge or
//! release it. Claims race against the shutdown signal; an envelope already
//! claimed is always finished before the worker exits.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use taskline_common::{FailurePolicy, QueueMetrics};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{ListEnd, QueueBackend};
use crate::envelope::Envelope;
use crate::error::{QueueError, QueueResult};
use crate::flow::AdmissionGate;
use crate::naming::QueueKeys;
use crate::registry::{HandlerRegistry, RegisteredHandler};

/// Pause after a failed claim before trying again.
const CLAIM_BACKOFF: Duration = Duration::from_secs(1);

/// Pause after the outbound gate defers an envelope.
const DEFER_BACKOFF: Duration = Duration::from_millis(100);

/// What became of a claimed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Acknowledged, requeued after a failure or dead-lettered.
    Done,
    /// Sent back by the outbound gate.
    Deferred,
}

/// Everything a worker needs, shared by all workers of a pool.
pub(crate) struct WorkerContext<B: QueueBackend> {
    pub(crate) backend: B,
    pub(crate) keys: QueueKeys,
    pub(crate) flow_key: String,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) gate: Arc<dyn AdmissionGate>,
    pub(crate) metrics: Arc<QueueMetrics>,
    pub(crate) consume_timeout: Duration,
    pub(crate) failure_policy: FailurePolicy,
}

impl<B: QueueBackend> WorkerContext<B> {
    /// Process one claimed envelope. `raw` is exactly what sits in the
    /// in-flight list, so acknowledgement removes this envelope and no other.
    pub(crate) async fn process(&self, backend: &B, raw: &str) -> Disposition {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, envelope = %raw, "Dropping malformed envelope");
                self.acknowledge(backend, raw).await;
                QueueMetrics::incr(&self.metrics.dropped_malformed);
                return Disposition::Done;
            }
        };

        let Some(handler) = self.registry.lookup(&envelope.name) else {
            warn!(type_name = %envelope.name, "No handler registered, discarding envelope");
            self.acknowledge(backend, raw).await;
            QueueMetrics::incr(&self.metrics.skipped_unknown);
            return Disposition::Done;
        };

        if !self.gate.allow(&self.flow_key).await {
            debug!(flow = %self.flow_key, type_name = %envelope.name, "Processing deferred by admission control");
            self.release(backend, raw, &self.keys.pending, ListEnd::Tail)
                .await;
            QueueMetrics::incr(&self.metrics.requeued_flow);
            return Disposition::Deferred;
        }

        match handle(handler.as_ref(), &envelope.data).await {
            Ok(saved) => {
                debug!(type_name = %envelope.name, saved, "Envelope processed");
                self.acknowledge(backend, raw).await;
                QueueMetrics::incr(&self.metrics.processed);
            }
            Err(e) => self.fail(backend, raw, &envelope.name, &e).await,
        }
        Disposition::Done
    }

    async fn fail(&self, backend: &B, raw: &str, type_name: &str, err: &QueueError) {
        match self.failure_policy {
            FailurePolicy::Requeue => {
                error!(type_name = %type_name, error = %err, envelope = %raw, "Processing failed, requeueing envelope");
                self.release(backend, raw, &self.keys.pending, ListEnd::Head)
                    .await;
                QueueMetrics::incr(&self.metrics.requeued_error);
            }
            FailurePolicy::DeadLetter => {
                error!(type_name = %type_name, error = %err, envelope = %raw, "Processing failed, moving envelope to error list");
                self.release(backend, raw, &self.keys.error, ListEnd::Head)
                    .await;
                QueueMetrics::incr(&self.metrics.dead_lettered);
            }
        }
    }

    async fn acknowledge(&self, backend: &B, raw: &str) {
        match backend.ack(&self.keys.in_flight, raw).await {
            Ok(true) => {}
            Ok(false) => debug!(queue = %self.keys.in_flight, "Envelope already gone from in-flight list"),
            Err(e) => error!(error = %e, "Failed to acknowledge envelope"),
        }
    }

    async fn release(&self, backend: &B, raw: &str, destination: &str, end: ListEnd) {
        match backend
            .release(&self.keys.in_flight, destination, raw, end)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(queue = %self.keys.in_flight, "Envelope already gone from in-flight list"),
            // Stays in flight until the next recovery sweep
            Err(e) => error!(error = %e, destination = %destination, "Failed to release envelope"),
        }
    }
}

/// Decode and save one payload, turning a handler panic into an error.
async fn handle(handler: &dyn RegisteredHandler, data: &str) -> QueueResult<bool> {
    let item = handler.parse_json(data)?;
    AssertUnwindSafe(handler.save(item))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(QueueError::HandlerPanicked(handler.name().to_string())))
}

/// Counts a worker as live until dropped, even if its task never ran.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(live))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_worker<B: QueueBackend>(
    id: usize,
    ctx: Arc<WorkerContext<B>>,
    mut shutdown: watch::Receiver<bool>,
    _live: LiveGuard,
) {
    let backend = match ctx.backend.for_worker().await {
        Ok(backend) => backend,
        Err(e) => {
            error!(worker = id, error = %e, "Worker failed to open its connection");
            return;
        }
    };
    debug!(worker = id, queue = %ctx.keys.pending, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = tokio::select! {
            _ = shutdown.changed() => break,
            result = backend.claim(&ctx.keys.pending, &ctx.keys.in_flight, ctx.consume_timeout) => result,
        };

        match claimed {
            Ok(Some(raw)) => {
                if ctx.process(&backend, &raw).await == Disposition::Deferred {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        () = tokio::time::sleep(DEFER_BACKOFF) => {}
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(worker = id, error = %e, "Failed to claim envelope");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(CLAIM_BACKOFF) => {}
                }
            }
        }
    }

    if let Err(e) = backend.close().await {
        warn!(worker = id, error = %e, "Failed to close worker connection");
    }
    debug!(worker = id, "Worker stopped");
}

/// A running set of workers.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime. `live` counts the
    /// workers that have not exited yet.
    pub(crate) fn spawn<B: QueueBackend>(
        count: usize,
        ctx: &Arc<WorkerContext<B>>,
        live: Arc<AtomicUsize>,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);

        let handles = (0..count)
            .map(|id| {
                let guard = LiveGuard::enter(&live);
                tokio::spawn(run_worker(id, Arc::clone(ctx), receiver.clone(), guard))
            })
            .collect();

        info!(workers = count, queue = %ctx.keys.pending, "Worker pool started");
        Self {
            handles,
            shutdown,
            live,
        }
    }

    /// Number of workers that have not exited.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Signal every worker and wait up to `timeout` for them to exit.
    ///
    /// Workers still running at the deadline are aborted. Returns `true`
    /// when all of them exited in time.
    pub(crate) async fn shutdown(mut self, timeout: Duration) -> bool {
        self.shutdown.send_replace(true);

        let joined = tokio::time::timeout(
            timeout,
            futures::future::join_all(self.handles.iter_mut()),
        )
        .await;

        match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task failed");
                    }
                }
                info!("Worker pool stopped");
                true
            }
            Err(_) => {
                warn!(
                    live = self.live(),
                    timeout_secs = timeout.as_secs(),
                    "Workers did not stop in time, aborting"
                );
                for handle in &self.handles {
                    handle.abort();
                }
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::HandlerError;
    use crate::flow::AllowAll;
    use crate::registry::Handler;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    const ORDER: &str = r#"{"name":"com.example.OrderCreated","data":"{\"id\":42}"}"#;

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    enum Outcome {
        Saved,
        Fails,
        Panics,
    }

    struct OrderHandler(Outcome);

    #[async_trait]
    impl Handler for OrderHandler {
        type Item = OrderCreated;

        async fn save(&self, item: OrderCreated) -> Result<bool, HandlerError> {
            match self.0 {
                Outcome::Saved => Ok(item.id == 42),
                Outcome::Fails => Err("database unavailable".into()),
                Outcome::Panics => panic!("handler bug"),
            }
        }
    }

    struct DenyAll;

    #[async_trait]
    impl AdmissionGate for DenyAll {
        async fn allow(&self, _flow: &str) -> bool {
            false
        }
    }

    fn context(
        backend: &MemoryBackend,
        outcome: Outcome,
        gate: Arc<dyn AdmissionGate>,
        failure_policy: FailurePolicy,
    ) -> WorkerContext<MemoryBackend> {
        WorkerContext {
            backend: backend.clone(),
            keys: QueueKeys {
                pending: "pending".into(),
                in_flight: "in-flight".into(),
                error: "error".into(),
            },
            flow_key: "outbound.default".into(),
            registry: Arc::new(
                HandlerRegistry::new().with("com.example.OrderCreated", OrderHandler(outcome)),
            ),
            gate,
            metrics: Arc::new(QueueMetrics::new()),
            consume_timeout: Duration::from_millis(50),
            failure_policy,
        }
    }

    /// Push `raw` and claim it the way a worker would.
    async fn claimed(backend: &MemoryBackend, raw: &str) -> String {
        backend.push_head("pending", raw).await.unwrap();
        backend
            .claim("pending", "in-flight", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_acknowledges() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(AllowAll), FailurePolicy::Requeue);
        let raw = claimed(&backend, ORDER).await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(backend.len("pending").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().processed, 1);
    }

    #[tokio::test]
    async fn test_malformed_envelope_dropped() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(AllowAll), FailurePolicy::Requeue);
        let raw = claimed(&backend, "not json").await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(backend.len("pending").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().dropped_malformed, 1);
    }

    #[tokio::test]
    async fn test_unknown_type_skipped() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(AllowAll), FailurePolicy::Requeue);
        let raw = claimed(&backend, r#"{"name":"com.example.Unknown","data":"{}"}"#).await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(backend.len("pending").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().skipped_unknown, 1);
    }

    #[tokio::test]
    async fn test_gate_rejection_returns_to_tail() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(DenyAll), FailurePolicy::Requeue);
        let raw = claimed(&backend, ORDER).await;
        backend.push_head("pending", "newer").await.unwrap();

        assert_eq!(ctx.process(&backend, &raw).await, Disposition::Deferred);

        assert_eq!(backend.range("pending").await.unwrap(), vec!["newer", ORDER]);
        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().requeued_flow, 1);
    }

    #[tokio::test]
    async fn test_handler_error_requeues_to_head() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Fails, Arc::new(AllowAll), FailurePolicy::Requeue);
        let raw = claimed(&backend, ORDER).await;
        backend.push_head("pending", "newer").await.unwrap();

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.range("pending").await.unwrap(), vec![ORDER, "newer"]);
        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().requeued_error, 1);
    }

    #[tokio::test]
    async fn test_payload_decode_error_requeues() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(AllowAll), FailurePolicy::Requeue);
        let bad = r#"{"name":"com.example.OrderCreated","data":"{\"id\":\"x\"}"}"#;
        let raw = claimed(&backend, bad).await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.range("pending").await.unwrap(), vec![bad]);
        assert_eq!(ctx.metrics.snapshot().requeued_error, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_policy() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Fails, Arc::new(AllowAll), FailurePolicy::DeadLetter);
        let raw = claimed(&backend, ORDER).await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.range("error").await.unwrap(), vec![ORDER]);
        assert_eq!(backend.len("pending").await.unwrap(), 0);
        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(ctx.metrics.snapshot().dead_lettered, 1);
    }

    /// Shared buffer the fmt subscriber writes into.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_failure_log_includes_envelope() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let order = r#"{"name":"com.example.OrderCreated","data":"{\"id\":4242}"}"#;
        for policy in [FailurePolicy::Requeue, FailurePolicy::DeadLetter] {
            let backend = MemoryBackend::new();
            let ctx = context(&backend, Outcome::Fails, Arc::new(AllowAll), policy);
            let raw = claimed(&backend, order).await;
            ctx.process(&backend, &raw).await;
        }

        let output = logs.contents();
        assert!(output.contains("requeueing envelope"), "{output}");
        assert!(output.contains("moving envelope to error list"), "{output}");
        assert_eq!(output.matches("4242").count(), 2, "{output}");
        assert!(output.contains("com.example.OrderCreated"), "{output}");
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Panics, Arc::new(AllowAll), FailurePolicy::DeadLetter);
        let raw = claimed(&backend, ORDER).await;

        ctx.process(&backend, &raw).await;

        assert_eq!(backend.range("error").await.unwrap(), vec![ORDER]);
        assert_eq!(ctx.metrics.snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_identical_envelopes_acknowledged_one_at_a_time() {
        let backend = MemoryBackend::new();
        let ctx = context(&backend, Outcome::Saved, Arc::new(AllowAll), FailurePolicy::Requeue);
        let first = claimed(&backend, ORDER).await;
        let _second = claimed(&backend, ORDER).await;

        ctx.process(&backend, &first).await;

        assert_eq!(backend.range("in-flight").await.unwrap(), vec![ORDER]);
    }

    #[tokio::test]
    async fn test_pool_processes_and_stops() {
        let backend = MemoryBackend::new();
        let ctx = Arc::new(context(
            &backend,
            Outcome::Saved,
            Arc::new(AllowAll),
            FailurePolicy::Requeue,
        ));
        backend.push_head("pending", ORDER).await.unwrap();

        let live = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::spawn(2, &ctx, Arc::clone(&live));
        assert_eq!(pool.live(), 2);

        for _ in 0..100 {
            if ctx.metrics.snapshot().processed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ctx.metrics.snapshot().processed, 1);

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
