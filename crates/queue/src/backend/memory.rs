use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{ListEnd, QueueBackend};
use crate::error::QueueResult;

#[derive(Default)]
struct Lists {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

/// In-process list storage with Redis list semantics.
///
/// Empty lists disappear, as in Redis, so key scans only see lists that
/// hold something.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Lists>,
}

impl MemoryBackend {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn move_tail_to_head(&self, source: &str, destination: &str) -> Option<String> {
        let mut lists = self.inner.lists.lock().await;
        let value = pop(&mut lists, source, ListEnd::Tail)?;
        lists
            .entry(destination.to_string())
            .or_default()
            .push_front(value.clone());
        Some(value)
    }
}

fn pop(lists: &mut HashMap<String, VecDeque<String>>, key: &str, end: ListEnd) -> Option<String> {
    let list = lists.get_mut(key)?;
    let value = match end {
        ListEnd::Head => list.pop_front(),
        ListEnd::Tail => list.pop_back(),
    };
    if list.is_empty() {
        lists.remove(key);
    }
    value
}

fn remove_one(lists: &mut HashMap<String, VecDeque<String>>, key: &str, value: &str) -> bool {
    let Some(list) = lists.get_mut(key) else {
        return false;
    };
    let Some(position) = list.iter().position(|v| v == value) else {
        return false;
    };
    list.remove(position);
    if list.is_empty() {
        lists.remove(key);
    }
    true
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn for_worker(&self) -> QueueResult<Self> {
        Ok(self.clone())
    }

    async fn close(&self) -> QueueResult<()> {
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()> {
        self.inner
            .lists
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        self.inner.pushed.notify_waiters();
        Ok(())
    }

    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before looking so a push in between is not missed
            let pushed = self.inner.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            if let Some(value) = self.move_tail_to_head(source, destination).await {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn recover_one(&self, source: &str, destination: &str) -> QueueResult<Option<String>> {
        Ok(self.move_tail_to_head(source, destination).await)
    }

    async fn ack(&self, key: &str, value: &str) -> QueueResult<bool> {
        let mut lists = self.inner.lists.lock().await;
        Ok(remove_one(&mut lists, key, value))
    }

    async fn release(
        &self,
        source: &str,
        destination: &str,
        value: &str,
        end: ListEnd,
    ) -> QueueResult<bool> {
        {
            let mut lists = self.inner.lists.lock().await;
            if !remove_one(&mut lists, source, value) {
                return Ok(false);
            }
            let list = lists.entry(destination.to_string()).or_default();
            match end {
                ListEnd::Head => list.push_front(value.to_string()),
                ListEnd::Tail => list.push_back(value.to_string()),
            }
        }
        self.inner.pushed.notify_waiters();
        Ok(true)
    }

    async fn len(&self, key: &str) -> QueueResult<u64> {
        let lists = self.inner.lists.lock().await;
        Ok(lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn range(&self, key: &str) -> QueueResult<Vec<String>> {
        let lists = self.inner.lists.lock().await;
        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan_keys(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let pattern = format!("{prefix}:");
        let lists = self.inner.lists.lock().await;
        Ok(lists
            .keys()
            .filter(|key| key.starts_with(&pattern))
            .cloned()
            .collect())
    }
}
