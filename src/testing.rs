//! In-memory stand-ins for the external services, used by the unit tests.

use core::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    collections::{HashMap, HashSet},
    time::SystemTime,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    cache::{DedupCache, digest_key},
    db::{SubscriberStore, TweetStore},
    mail::Mailer,
    summary::Summarizer,
};

/// Expiry follows tokio's clock, so paused-time tests can jump past it.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Instant>>,
    broken: Mutex<HashSet<String>>,
}

impl MemoryCache {
    /// Every lookup for `text` fails from now on.
    pub fn break_for(&self, text: &str) {
        self.broken.lock().insert(digest_key(text));
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries
            .lock()
            .get(&digest_key(text))
            .is_some_and(|expiry| *expiry > Instant::now())
    }
}

#[async_trait]
impl DedupCache for MemoryCache {
    async fn mark_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        if self.broken.lock().contains(key) {
            anyhow::bail!("connection reset by peer");
        }
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                entries.insert(key.to_owned(), now + ttl);
                Ok(true)
            }
        }
    }
}

pub struct StoredTweet {
    pub content: String,
    pub search_term: String,
    pub captured_at: SystemTime,
}

#[derive(Default)]
pub struct MemoryStore {
    pub tweets: Mutex<Vec<StoredTweet>>,
    pub subscribers: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
    down: AtomicBool,
    pub reads: AtomicUsize,
}

impl MemoryStore {
    /// Inserting exactly `content` fails.
    pub fn reject(&self, content: &str) {
        self.rejected.lock().insert(content.to_owned());
    }

    /// Every call fails.
    pub fn take_down(&self) {
        self.down.store(true, Ordering::Relaxed);
    }

    pub fn push_tweet(&self, content: &str, age: Duration) {
        self.tweets.lock().push(StoredTweet {
            content: content.to_owned(),
            search_term: "test".to_owned(),
            captured_at: SystemTime::now() - age,
        });
    }

    pub fn with_subscribers<const N: usize>(emails: [&str; N]) -> Self {
        let store = Self::default();
        store
            .subscribers
            .lock()
            .extend(emails.into_iter().map(ToOwned::to_owned));
        store
    }

    pub fn contents(&self) -> Vec<String> {
        self.tweets.lock().iter().map(|t| t.content.clone()).collect()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.down.load(Ordering::Relaxed) {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl TweetStore for MemoryStore {
    async fn insert_tweet(&self, content: &str, search_term: &str) -> anyhow::Result<()> {
        self.check()?;
        if self.rejected.lock().contains(content) {
            anyhow::bail!("value too long for type character varying");
        }
        self.tweets.lock().push(StoredTweet {
            content: content.to_owned(),
            search_term: search_term.to_owned(),
            captured_at: SystemTime::now(),
        });
        Ok(())
    }

    async fn recent_tweets(&self, window: Duration) -> anyhow::Result<Vec<String>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        let since = SystemTime::now() - window;
        Ok(self
            .tweets
            .lock()
            .iter()
            .filter(|t| t.captured_at >= since)
            .map(|t| t.content.clone())
            .collect())
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn add_subscriber(&self, email: &str) -> anyhow::Result<()> {
        self.check()?;
        self.subscribers.lock().push(email.to_owned());
        Ok(())
    }

    async fn subscribers(&self) -> anyhow::Result<Vec<String>> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.subscribers.lock().clone())
    }
}

pub struct FakeSummarizer {
    pub reply: Result<String, String>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeSummarizer {
    pub fn replying(summary: &str) -> Self {
        Self { reply: Ok(summary.to_owned()), requests: Mutex::default() }
    }

    pub fn failing(reason: &str) -> Self {
        Self { reply: Err(reason.to_owned()), requests: Mutex::default() }
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str) -> anyhow::Result<String> {
        self.requests.lock().push(text.to_owned());
        self.reply.clone().map_err(anyhow::Error::msg)
    }
}

#[derive(Default)]
pub struct FakeMailer {
    pub sent: Mutex<Vec<(String, String, String)>>,
    bouncing: Mutex<HashSet<String>>,
    pub attempts: AtomicUsize,
}

impl FakeMailer {
    pub fn bounce(&self, to: &str) {
        self.bouncing.lock().insert(to.to_owned());
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(to, ..)| to.clone()).collect()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if self.bouncing.lock().contains(to) {
            anyhow::bail!("550 mailbox unavailable: {to}");
        }
        self.sent
            .lock()
            .push((to.to_owned(), subject.to_owned(), body.to_owned()));
        Ok(())
    }
}
