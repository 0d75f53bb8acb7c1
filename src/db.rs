use core::time::Duration;

use async_trait::async_trait;
use bb8_postgres::{PostgresConnectionManager, bb8};
use tokio_postgres::NoTls;

use crate::config::DbArgs;

pub type ConnectionManager = PostgresConnectionManager<NoTls>;
pub type Pool = bb8::Pool<ConnectionManager>;

/// Append-only access to the `tweets` table.
#[async_trait]
pub trait TweetStore: Send + Sync {
    /// Inserts one row, stamped with the database clock.
    async fn insert_tweet(&self, content: &str, search_term: &str) -> anyhow::Result<()>;

    /// Contents of every row captured within the trailing `window`, oldest first.
    async fn recent_tweets(&self, window: Duration) -> anyhow::Result<Vec<String>>;
}

/// Append-only access to the `subscribers` table.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn add_subscriber(&self, email: &str) -> anyhow::Result<()>;

    async fn subscribers(&self) -> anyhow::Result<Vec<String>>;
}

pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    /// Builds the pool and checks out one connection, so an unreachable
    /// database fails here rather than at the first query.
    pub async fn connect(args: &DbArgs) -> anyhow::Result<Self> {
        let mut config = args.database_url.parse::<tokio_postgres::Config>()?;
        config.connect_timeout(args.connect_timeout());

        let manager = PostgresConnectionManager::new(config, NoTls);

        let pool = Pool::builder()
            .connection_timeout(args.connect_timeout())
            .build(manager)
            .await?;

        drop(pool.get().await?);
        tracing::info!(target: "db", "connected to database");

        Ok(Self { pool })
    }
}

#[async_trait]
impl TweetStore for PgStore {
    async fn insert_tweet(&self, content: &str, search_term: &str) -> anyhow::Result<()> {
        const SQL: &str = "insert into tweets (content, search_term, tweet_time) values ($1, $2, now())";

        let conn = self.pool.get().await?;
        let stmt = conn.prepare(SQL).await?;
        conn.execute(&stmt, &[&content, &search_term]).await?;
        Ok(())
    }

    async fn recent_tweets(&self, window: Duration) -> anyhow::Result<Vec<String>> {
        const SQL: &str = "select content from tweets where tweet_time >= now() - make_interval(secs => $1::float8) order by tweet_time";

        let conn = self.pool.get().await?;
        let stmt = conn.prepare(SQL).await?;
        let rows = conn.query(&stmt, &[&window.as_secs_f64()]).await?;

        rows.into_iter()
            .map(|row| row.try_get::<_, String>(0).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl SubscriberStore for PgStore {
    async fn add_subscriber(&self, email: &str) -> anyhow::Result<()> {
        const SQL: &str = "insert into subscribers (email) values ($1)";

        let conn = self.pool.get().await?;
        let stmt = conn.prepare(SQL).await?;
        conn.execute(&stmt, &[&email]).await?;
        Ok(())
    }

    async fn subscribers(&self) -> anyhow::Result<Vec<String>> {
        const SQL: &str = "select email from subscribers";

        let conn = self.pool.get().await?;
        let stmt = conn.prepare(SQL).await?;
        let rows = conn.query(&stmt, &[]).await?;

        rows.into_iter()
            .map(|row| row.try_get::<_, String>(0).map_err(Into::into))
            .collect()
    }
}
