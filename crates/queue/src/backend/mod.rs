//! List storage behind the queue.
//!
//! The queue only needs a handful of list primitives. [`RedisBackend`] maps
//! them onto Redis commands; [`MemoryBackend`] keeps the lists in process
//! for tests and local runs.
//!
//! Lists follow Redis orientation: new envelopes go to the head, workers
//! claim from the tail.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// End of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    /// Left end; the last to be claimed.
    Head,
    /// Right end; the next to be claimed.
    Tail,
}

/// List primitives used by the queue.
#[async_trait]
pub trait QueueBackend: Clone + Send + Sync + Sized + 'static {
    /// A handle suitable for one worker's blocking claims.
    async fn for_worker(&self) -> QueueResult<Self>;

    /// Release resources held by a handle from [`for_worker`](Self::for_worker).
    async fn close(&self) -> QueueResult<()>;

    /// Push `value` onto the head of `key`.
    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Atomically move the tail of `source` to the head of `destination`,
    /// waiting up to `timeout` for `source` to become non-empty.
    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>>;

    /// Like [`claim`](Self::claim) without waiting.
    async fn recover_one(&self, source: &str, destination: &str) -> QueueResult<Option<String>>;

    /// Remove one occurrence of `value` from `key`. Returns whether one was found.
    async fn ack(&self, key: &str, value: &str) -> QueueResult<bool>;

    /// Atomically remove one occurrence of `value` from `source` and, if it
    /// was there, push it onto `end` of `destination`.
    async fn release(
        &self,
        source: &str,
        destination: &str,
        value: &str,
        end: ListEnd,
    ) -> QueueResult<bool>;

    /// Length of `key`.
    async fn len(&self, key: &str) -> QueueResult<u64>;

    /// Every element of `key`, head first.
    async fn range(&self, key: &str) -> QueueResult<Vec<String>>;

    /// Every key of the form `<prefix>:*`.
    async fn scan_keys(&self, prefix: &str) -> QueueResult<Vec<String>>;
}
