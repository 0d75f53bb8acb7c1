//! Dedup cache: whether a scraped text was already seen inside the TTL.
//!
//! Marking is a single `SET NX EX`, so concurrent scrapers never both admit
//! the same text.

use core::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use sha2::{Digest, Sha256};

use crate::config::CacheArgs;

/// Cache key of a scraped text: `tweet:` followed by the hex SHA-256 of the
/// raw text.
pub fn digest_key(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    let mut key = String::with_capacity(6 + 64);
    key.push_str("tweet:");
    key.push_str(&hex::encode(hash));
    key
}

/// Key presence with expiry. Only existence matters, never the value.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Marks `key` present for `ttl` unless it already is.
    ///
    /// Returns `true` when this call created the mark, `false` when the key
    /// was already present. Check and mark happen as one step.
    async fn mark_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub async fn connect(args: &CacheArgs) -> anyhow::Result<Self> {
        let client = redis::Client::open(args.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::info!(target: "cache", "connected to redis: {pong}");

        Ok(Self { conn })
    }
}

#[async_trait]
impl DedupCache for RedisCache {
    async fn mark_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
