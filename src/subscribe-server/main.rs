use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use twmon::{
    config::{DbArgs, ServerArgs},
    db::PgStore,
};

/// Serve the subscription form and its `/subscribe` endpoint.
#[derive(clap::Parser)]
struct Args {
    #[command(flatten)]
    db: DbArgs,
    #[command(flatten)]
    server: ServerArgs,
}

async fn shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: "main", "cannot listen for ctrl-c: {e}");
        core::future::pending::<()>().await;
    }
    tracing::info!(target: "main", "shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;

    pretty_env_logger::init_timed();

    let args = Args::parse();

    let store = Arc::new(PgStore::connect(&args.db).await?);

    let app = twmon::subscribe::router(store)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive());

    let listener = TcpListener::bind(args.server.listen).await?;
    tracing::info!(target: "main", "server starting on {}", args.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;
    Ok(())
}
