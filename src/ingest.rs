//! The dedup gate between the page and the `tweets` table.
//!
//! Each extracted text is fingerprinted, checked-and-marked in the cache, and
//! inserted only when this run created the mark. A text therefore produces at
//! most one row per cache expiry window. Failures are per item: logged, then
//! the next item is processed.

use core::time::Duration;

use crate::{
    cache::{DedupCache, digest_key},
    db::TweetStore,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub seen: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Duplicate,
}

pub struct Gate<'a, C, S> {
    pub cache: &'a C,
    pub store: &'a S,
    pub search_term: &'a str,
    pub ttl: Duration,
}

impl<C, S> Gate<'_, C, S>
where
    C: DedupCache,
    S: TweetStore,
{
    /// Forwards one text through the gate.
    pub async fn admit(&self, text: &str) -> anyhow::Result<Outcome> {
        let key = digest_key(text);

        if !self.cache.mark_if_absent(&key, self.ttl).await? {
            return Ok(Outcome::Duplicate);
        }

        self.store.insert_tweet(text, self.search_term).await?;
        Ok(Outcome::Inserted)
    }

    /// Runs every extracted item through [`Self::admit`], in order.
    pub async fn run<I>(&self, items: I) -> Stats
    where
        I: IntoIterator<Item = anyhow::Result<String>>,
    {
        let mut stats = Stats::default();

        for (idx, item) in items.into_iter().enumerate() {
            stats.seen += 1;

            let text = match item {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(target: "ingest", "[#{idx}] extraction failed: {e}");
                    stats.failed += 1;
                    continue;
                }
            };

            match self.admit(&text).await {
                Ok(Outcome::Inserted) => {
                    tracing::info!(target: "ingest", "\x1b[36m[#{idx}] new tweet saved\x1b[0m: {text:?}");
                    stats.inserted += 1;
                }
                Ok(Outcome::Duplicate) => {
                    tracing::debug!(target: "ingest", "[#{idx}] already processed: {text:?}");
                    stats.duplicates += 1;
                }
                Err(e) => {
                    tracing::error!(target: "ingest", "\x1b[31m[#{idx}] {e}\x1b[0m");
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            target: "ingest",
            "{}/{} items inserted ({} duplicates, {} failed)",
            stats.inserted,
            stats.seen,
            stats.duplicates,
            stats.failed,
        );
        stats
    }
}
