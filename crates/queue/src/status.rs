//! Fleet-wide backlog report.

use serde::Serialize;
use tracing::debug;

use crate::backend::QueueBackend;
use crate::error::QueueResult;
use crate::naming::PENDING_PREFIX;

/// Backlog of one queue identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Key suffix identifying the queue: `[<queue>:]<server[:port]>`.
    pub identity: String,
    /// Length of the pending list.
    pub depth: u64,
}

/// Reads pending-list depths for every identity sharing the Redis instance.
#[derive(Clone)]
pub struct StatusReporter<B: QueueBackend> {
    backend: B,
}

impl<B: QueueBackend> StatusReporter<B> {
    /// Create a reporter over `backend`.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// One entry per pending list, sorted by identity.
    ///
    /// A list drained between the scan and the length read reports depth 0.
    pub async fn status(&self) -> QueueResult<Vec<QueueStatus>> {
        let prefix = format!("{PENDING_PREFIX}:");
        let mut report = Vec::new();

        for key in self.backend.scan_keys(PENDING_PREFIX).await? {
            let Some(identity) = key.strip_prefix(&prefix) else {
                continue;
            };
            let depth = self.backend.len(&key).await?;
            report.push(QueueStatus {
                identity: identity.to_string(),
                depth,
            });
        }

        report.sort_by(|a, b| a.identity.cmp(&b.identity));
        debug!(queues = report.len(), "Collected queue status");
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn test_status_covers_every_identity() {
        let backend = MemoryBackend::new();
        for _ in 0..3 {
            backend.push_head("$ASYNC_STORAGE:web-2:8080", "x").await.unwrap();
        }
        backend.push_head("$ASYNC_STORAGE:orders:web-1", "x").await.unwrap();
        backend.push_head("$ASYNC_STORAGE_ACK:web-3", "x").await.unwrap();
        backend.push_head("$ASYNC_STORAGE_ERROR:web-3", "x").await.unwrap();

        let reporter = StatusReporter::new(backend);
        let status = reporter.status().await.unwrap();

        assert_eq!(
            status,
            vec![
                QueueStatus {
                    identity: "orders:web-1".into(),
                    depth: 1,
                },
                QueueStatus {
                    identity: "web-2:8080".into(),
                    depth: 3,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_status_empty() {
        let reporter = StatusReporter::new(MemoryBackend::new());
        assert!(reporter.status().await.unwrap().is_empty());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = QueueStatus {
            identity: "web-1".into(),
            depth: 2,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"identity":"web-1","depth":2}"#
        );
    }
}
