//! Publishing typed payloads.

use std::sync::Arc;

use taskline_common::QueueMetrics;
use tracing::debug;

use crate::backend::QueueBackend;
use crate::envelope::Envelope;
use crate::error::{QueueError, QueueResult};
use crate::flow::AdmissionGate;
use crate::registry::HandlerRegistry;

/// Pushes envelopes onto the pending list.
#[derive(Clone)]
pub struct Publisher<B: QueueBackend> {
    backend: B,
    pending_key: String,
    flow_key: String,
    registry: Arc<HandlerRegistry>,
    gate: Arc<dyn AdmissionGate>,
    metrics: Arc<QueueMetrics>,
}

impl<B: QueueBackend> Publisher<B> {
    /// Create a publisher for the given pending list.
    #[must_use]
    pub fn new(
        backend: B,
        pending_key: String,
        flow_key: String,
        registry: Arc<HandlerRegistry>,
        gate: Arc<dyn AdmissionGate>,
        metrics: Arc<QueueMetrics>,
    ) -> Self {
        Self {
            backend,
            pending_key,
            flow_key,
            registry,
            gate,
            metrics,
        }
    }

    /// Publish `item` for asynchronous processing.
    ///
    /// Returns `Ok(false)` when the inbound gate refuses the publish; nothing
    /// is enqueued in that case. `Ok(true)` means the envelope is stored.
    ///
    /// # Errors
    /// [`QueueError::UnregisteredType`] if no handler is registered for `T`;
    /// this is never retried. Redis and serialization failures are returned
    /// as they occur.
    pub async fn publish<T: Send + Sync + 'static>(&self, item: &T) -> QueueResult<bool> {
        let handler = self
            .registry
            .lookup_type::<T>()
            .ok_or_else(|| QueueError::UnregisteredType(std::any::type_name::<T>().to_string()))?;

        if !self.gate.allow(&self.flow_key).await {
            debug!(flow = %self.flow_key, type_name = handler.name(), "Publish refused by admission control");
            QueueMetrics::incr(&self.metrics.publish_rejected);
            return Ok(false);
        }

        let envelope = Envelope::new(handler.name().to_string(), handler.to_json(item)?);
        self.backend
            .push_head(&self.pending_key, &envelope.encode()?)
            .await?;

        QueueMetrics::incr(&self.metrics.published);
        debug!(queue = %self.pending_key, type_name = %envelope.name, "Published envelope");
        Ok(true)
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

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        type Item = OrderCreated;

        async fn save(&self, _item: OrderCreated) -> Result<bool, HandlerError> {
            Ok(true)
        }
    }

    struct DenyAll;

    #[async_trait]
    impl AdmissionGate for DenyAll {
        async fn allow(&self, _flow: &str) -> bool {
            false
        }
    }

    fn publisher(backend: &MemoryBackend, gate: Arc<dyn AdmissionGate>) -> Publisher<MemoryBackend> {
        let registry = HandlerRegistry::new().with("com.example.OrderCreated", NoopHandler);
        Publisher::new(
            backend.clone(),
            "$ASYNC_STORAGE:test".into(),
            "inbound.default".into(),
            Arc::new(registry),
            gate,
            Arc::new(QueueMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_publish_pushes_envelope() {
        let backend = MemoryBackend::new();
        let publisher = publisher(&backend, Arc::new(AllowAll));

        assert!(publisher.publish(&OrderCreated { id: 42 }).await.unwrap());

        assert_eq!(
            backend.range("$ASYNC_STORAGE:test").await.unwrap(),
            vec![r#"{"name":"com.example.OrderCreated","data":"{\"id\":42}"}"#]
        );
        assert_eq!(publisher.metrics.snapshot().published, 1);
    }

    #[tokio::test]
    async fn test_publish_refused_by_gate() {
        let backend = MemoryBackend::new();
        let publisher = publisher(&backend, Arc::new(DenyAll));

        assert!(!publisher.publish(&OrderCreated { id: 1 }).await.unwrap());

        assert_eq!(backend.len("$ASYNC_STORAGE:test").await.unwrap(), 0);
        assert_eq!(publisher.metrics.snapshot().publish_rejected, 1);
    }

    #[tokio::test]
    async fn test_publish_unregistered_type_fails_fast() {
        let backend = MemoryBackend::new();
        let publisher = publisher(&backend, Arc::new(AllowAll));

        let result = publisher.publish(&"plain string".to_string()).await;

        assert!(matches!(result, Err(QueueError::UnregisteredType(_))));
        assert_eq!(backend.len("$ASYNC_STORAGE:test").await.unwrap(), 0);
    }
}
