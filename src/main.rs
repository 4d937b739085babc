use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use cinedex::{
    AppState,
    cache::ResponseCache,
    config::Config,
    db,
    mailer::{LogTransport, Mailer, MailerOptions},
    store::CatalogStore,
    sync::{SyncJob, SyncOptions},
    tmdb::TmdbClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,cinedex=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Arc::new(Config::from_env()?);
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("sync") => run_sync(config, &args[2..]).await,
        Some("serve") | None => serve(config).await,
        Some(other) => anyhow::bail!("unknown command: {other} (expected `serve` or `sync`)"),
    }
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let db = db::connect_and_migrate(&config.database_url).await?;
    let store = CatalogStore::new(db.clone());
    let cache = ResponseCache::new(db);
    let mailer =
        Mailer::spawn(Arc::new(LogTransport), config.email_from.clone(), MailerOptions::default());

    let state = Arc::new(AppState { config: config.clone(), store, cache, mailer });

    let app = cinedex::routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_sync(config: Arc<Config>, args: &[String]) -> anyhow::Result<()> {
    let mut pages = config.sync_pages;
    let mut force = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--pages" => {
                pages = iter
                    .next()
                    .and_then(|v| v.parse().ok())
                    .context("--pages expects a positive integer")?;
            },
            "--force" => force = true,
            other => anyhow::bail!("unknown sync flag: {other}"),
        }
    }
    if pages == 0 {
        anyhow::bail!("--pages must be at least 1");
    }

    let db = db::connect_and_migrate(&config.database_url).await?;
    let store = CatalogStore::new(db);

    // The job itself has no skip logic; the population gate lives here so
    // schedulers can call `sync` unconditionally.
    if !force {
        let count = store.movie_count().await?;
        if count >= config.sync_threshold {
            tracing::info!(
                movies = count,
                threshold = config.sync_threshold,
                "catalog already populated, skipping sync (use --force to override)"
            );
            return Ok(());
        }
    }

    let http = reqwest::Client::builder()
        .user_agent("cinedex/0.1")
        .timeout(Duration::from_secs(30))
        .build()?;
    let client = TmdbClient::new(
        http,
        config.tmdb_access_token.clone(),
        config.tmdb_base_url.clone(),
        config.tmdb_rps,
    );

    let job = SyncJob::new(
        store,
        client,
        SyncOptions { retry_base_delay: config.sync_retry_base_delay, ..SyncOptions::default() },
    );
    let summary = job.run(pages).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_fatal_errors() {
        std::process::exit(1);
    }
    Ok(())
}
