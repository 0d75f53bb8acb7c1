use twmon::{
    cache::RedisCache,
    config::{BrowserArgs, CacheArgs, DbArgs, SearchArgs},
    db::PgStore,
    ingest::Gate,
    scrape::{Session, parse_selector},
    util::{Poll, prompt_line},
};

/// Scrape the live search results for a hashtag into the `tweets` table.
#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    db: DbArgs,
    #[command(flatten)]
    cache: CacheArgs,
    #[command(flatten)]
    browser: BrowserArgs,
    #[command(flatten)]
    search: SearchArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();

    let args = Args::parse();
    let selector = parse_selector(&args.search.selector)?;

    let cache = RedisCache::connect(&args.cache).await?;
    let store = PgStore::connect(&args.db).await?;

    let term = match args.search.term.clone() {
        Some(term) => term,
        None => tokio::task::spawn_blocking(|| {
            prompt_line("Enter the hashtag or keyword to search for (without #): ")
        })
        .await??,
    };

    let session = Session::establish(&args.browser).await?;
    session
        .login(&args.browser, Poll::new(args.search.page_timeout()))
        .await?;
    session.search(&term, &args.search).await?;

    let items = session.extract(&selector).await?;
    tracing::info!(target: "main", "extracted {} elements", items.len());

    let gate = Gate {
        cache: &cache,
        store: &store,
        search_term: &term,
        ttl: args.cache.ttl(),
    };
    gate.run(items).await;

    Ok(())
}
