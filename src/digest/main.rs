use core::time::Duration;

use twmon::{
    config::{DbArgs, SmtpArgs, SummarizerArgs},
    db::PgStore,
    mail::SmtpMailer,
    summary::{DEFAULT_SUBJECT, HttpSummarizer, Job},
};

/// Summarize recent tweets and mail the summary to every subscriber.
#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    db: DbArgs,
    #[command(flatten)]
    summarizer: SummarizerArgs,
    #[command(flatten)]
    smtp: SmtpArgs,
    /// Trailing window of tweets to summarize, in seconds.
    #[arg(long, default_value_t = 60 * 60)]
    window: u64,
    #[arg(long, default_value = DEFAULT_SUBJECT)]
    subject: String,
    /// Repeat every N seconds instead of running once.
    #[arg(long, value_name = "SECS")]
    every: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();

    let args = Args::parse();

    let store = PgStore::connect(&args.db).await?;
    let summarizer = HttpSummarizer::new(&args.summarizer)?;
    let mailer = SmtpMailer::new(&args.smtp)?;

    let job = Job {
        store: &store,
        summarizer: &summarizer,
        mailer: &mailer,
        window: Duration::from_secs(args.window),
        subject: &args.subject,
    };

    let Some(every) = args.every else {
        job.run().await?;
        return Ok(());
    };

    job.run_every(Duration::from_secs(every.max(1)), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(target: "main", "failed to listen for ctrl-c: {e}");
            core::future::pending::<()>().await;
        }
    })
    .await;
    tracing::info!(target: "main", "shutting down");
    Ok(())
}
