use core::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    config::SummarizerArgs,
    db::{SubscriberStore, TweetStore},
    mail::Mailer,
};

pub const DEFAULT_SUBJECT: &str = "Hourly Twitter Summary";

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> anyhow::Result<String>;
}

/// Client of the model server: `POST {"text"}` → `{"summary"}`.
pub struct HttpSummarizer {
    client: Client,
    url: String,
}

#[derive(Serialize)]
struct SummaryRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: String,
}

impl HttpSummarizer {
    pub fn new(args: &SummarizerArgs) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(const { Duration::from_secs(8) })
            .timeout(args.timeout())
            .build()?;
        Ok(Self { client, url: args.summarizer_url.clone() })
    }
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, text: &str) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&SummaryRequest { text })
            .send()
            .await?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("failed to get summary, status code: {status}, response body: {body}");
        }

        let SummaryResponse { summary } = resp.json().await?;
        Ok(summary)
    }
}

/// The text sent to the summarizer for a batch of tweets.
pub fn prompt(tweets: &[String]) -> String {
    format!("Summarize the following tweets:\n\n{}", tweets.join("\n\n"))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub tweets: usize,
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

pub struct Job<'a, S, Z, M> {
    pub store: &'a S,
    pub summarizer: &'a Z,
    pub mailer: &'a M,
    pub window: Duration,
    pub subject: &'a str,
}

impl<S, Z, M> Job<'_, S, Z, M>
where
    S: TweetStore + SubscriberStore,
    Z: Summarizer,
    M: Mailer,
{
    /// Summarizes the trailing window and mails the result to every subscriber.
    ///
    /// Reading tweets, summarizing, and reading subscribers are fatal; a failed
    /// delivery is logged and the remaining subscribers are still served.
    pub async fn run(&self) -> anyhow::Result<Report> {
        let tweets = self.store.recent_tweets(self.window).await?;

        if tweets.is_empty() {
            tracing::info!(target: "summary", "no tweets found in the past {:?}", self.window);
            return Ok(Report::default());
        }
        tracing::info!(target: "summary", "summarizing {} tweets ...", tweets.len());

        let summary = self.summarizer.summarize(&prompt(&tweets)).await?;
        let emails = self.store.subscribers().await?;

        let mut report = Report {
            tweets: tweets.len(),
            recipients: emails.len(),
            ..Report::default()
        };

        for email in &emails {
            match self.mailer.send(email, self.subject, &summary).await {
                Ok(()) => {
                    tracing::info!(target: "summary", "\x1b[36msent summary to {email}\x1b[0m");
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::error!(target: "summary", "\x1b[31merror sending email to {email}: {e}\x1b[0m");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(target: "summary", "{}/{} deliveries succeeded", report.delivered, report.recipients);
        Ok(report)
    }

    /// Runs the job every `period`, starting now, until `stop` resolves.
    ///
    /// A failed run is logged and the next tick runs regardless.
    pub async fn run_every(&self, period: Duration, stop: impl Future<Output = ()>) {
        let mut stop = core::pin::pin!(stop);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = &mut stop => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run().await {
                tracing::error!(target: "summary", "\x1b[31msummary job failed: {e:#}\x1b[0m");
            }
        }
    }
}
