use std::time::Duration;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::{ClientLike, KeysInterface, ListInterface, LuaInterface};
use fred::types::config::Config as RedisConfig;
use fred::types::Key;
use fred::types::lists::LMoveDirection;
use futures::TryStreamExt;
use tracing::{debug, info};

use super::{ListEnd, QueueBackend};
use crate::error::QueueResult;

/// Removes exactly one copy of `ARGV[1]` from `KEYS[1]` and pushes it onto
/// `KEYS[2]`, at the tail when `ARGV[2]` is `tail`. Returns 1 when moved.
const RELEASE_SCRIPT: &str = r"
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
  return 0
end
if ARGV[2] == 'tail' then
  redis.call('RPUSH', KEYS[2], ARGV[1])
else
  redis.call('LPUSH', KEYS[2], ARGV[1])
end
return 1
";

/// `SCAN` page size.
const SCAN_COUNT: u32 = 100;

/// Redis-backed list storage.
#[derive(Clone)]
pub struct RedisBackend {
    client: RedisClient,
}

impl RedisBackend {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        let config = RedisConfig::from_url(redis_url)?;
        let client = RedisClient::new(config, None, None, None);
        client.init().await?;
        info!("Queue backend connected to Redis");
        Ok(Self { client })
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &RedisClient {
        &self.client
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn for_worker(&self) -> QueueResult<Self> {
        // Blocking commands hold the connection, so every worker gets its own
        let client = self.client.clone_new();
        client.init().await?;
        debug!("Opened dedicated worker connection");
        Ok(Self { client })
    }

    async fn close(&self) -> QueueResult<()> {
        self.client.quit().await?;
        Ok(())
    }

    async fn push_head(&self, key: &str, value: &str) -> QueueResult<()> {
        let _: i64 = self.client.lpush(key, value).await?;
        Ok(())
    }

    async fn claim(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> QueueResult<Option<String>> {
        let value: Option<String> = self
            .client
            .blmove(
                source,
                destination,
                LMoveDirection::Right,
                LMoveDirection::Left,
                timeout.as_secs_f64(),
            )
            .await?;
        Ok(value)
    }

    async fn recover_one(&self, source: &str, destination: &str) -> QueueResult<Option<String>> {
        let value: Option<String> = self
            .client
            .lmove(source, destination, LMoveDirection::Right, LMoveDirection::Left)
            .await?;
        Ok(value)
    }

    async fn ack(&self, key: &str, value: &str) -> QueueResult<bool> {
        let removed: i64 = self.client.lrem(key, 1, value).await?;
        Ok(removed > 0)
    }

    async fn release(
        &self,
        source: &str,
        destination: &str,
        value: &str,
        end: ListEnd,
    ) -> QueueResult<bool> {
        let end = match end {
            ListEnd::Head => "head",
            ListEnd::Tail => "tail",
        };
        let moved: i64 = self
            .client
            .eval(
                RELEASE_SCRIPT,
                vec![source, destination],
                vec![value, end],
            )
            .await?;
        Ok(moved == 1)
    }

    async fn len(&self, key: &str) -> QueueResult<u64> {
        let len: u64 = self.client.llen(key).await?;
        Ok(len)
    }

    async fn range(&self, key: &str) -> QueueResult<Vec<String>> {
        let values: Vec<String> = self.client.lrange(key, 0, -1).await?;
        Ok(values)
    }

    async fn scan_keys(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let pattern = format!("{prefix}:*");
        let keys: Vec<Key> = self
            .client
            .scan_buffered(pattern, Some(SCAN_COUNT), None)
            .try_collect()
            .await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.as_str().map(str::to_owned))
            .collect())
    }
}
