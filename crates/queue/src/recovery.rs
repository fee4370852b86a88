//! Startup sweep of stranded in-flight envelopes.

use tracing::{debug, info};

use crate::backend::QueueBackend;
use crate::error::QueueResult;

/// Move every envelope of `source` back onto `destination`, oldest first.
///
/// Used before workers start, with `source` the in-flight list and
/// `destination` the pending list, and to replay the error list.
pub async fn drain<B: QueueBackend>(backend: &B, source: &str, destination: &str) -> QueueResult<u64> {
    let mut moved = 0;
    while let Some(envelope) = backend.recover_one(source, destination).await? {
        debug!(from = %source, to = %destination, %envelope, "Restored envelope");
        moved += 1;
    }
    if moved > 0 {
        info!(from = %source, to = %destination, count = moved, "Restored envelopes");
    }
    Ok(moved)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drain_restores_stranded_envelopes() {
        let backend = MemoryBackend::new();
        backend.push_head("pending", "a").await.unwrap();
        backend.push_head("pending", "b").await.unwrap();
        backend
            .claim("pending", "in-flight", Duration::from_millis(10))
            .await
            .unwrap();

        let moved = drain(&backend, "in-flight", "pending").await.unwrap();

        assert_eq!(moved, 1);
        assert_eq!(backend.len("in-flight").await.unwrap(), 0);
        assert_eq!(backend.range("pending").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drain_empty_list() {
        let backend = MemoryBackend::new();
        assert_eq!(drain(&backend, "in-flight", "pending").await.unwrap(), 0);
    }
}
