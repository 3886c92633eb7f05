use std::{process, sync::Arc};

use brusio::{
    application::{error::AppError, feed::FeedQueryService, repos::FeedItemsRepo},
    cache::{CacheWarmer, MemoryOrderedCache, OrderedCacheStore, Outbox, WritebackCoordinator},
    config,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::net::TcpListener;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::default()));

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let repo: Arc<dyn FeedItemsRepo> = repositories.clone();

    let store: Arc<dyn OrderedCacheStore> = Arc::new(MemoryOrderedCache::new());

    let (outbox, outbox_worker) = Outbox::channel(settings.cache.clone(), repo.clone());
    let outbox_handle = tokio::spawn(outbox_worker.run());

    let warmer = Arc::new(CacheWarmer::new(
        settings.cache.clone(),
        store.clone(),
        repo.clone(),
        outbox.clone(),
    ));
    let writeback = Arc::new(WritebackCoordinator::new(store.clone(), outbox.clone()));
    let feed = Arc::new(FeedQueryService::new(
        settings.cache.clone(),
        store.clone(),
        warmer.clone(),
        writeback,
    ));

    // Startup warm; reads arriving before it completes see an empty feed and
    // re-trigger it harmlessly.
    warmer.trigger_full_warm();

    let router = http::build_router(HttpState { feed });
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "brusio::serve",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    // Router state is gone once serve returns; dropping the remaining handles
    // closes the outbox channel so the worker can finish queued updates.
    drop(warmer);
    drop(outbox);
    if tokio::time::timeout(settings.server.graceful_shutdown, outbox_handle)
        .await
        .is_err()
    {
        warn!(
            target = "brusio::serve",
            "outbox did not drain within the shutdown window"
        );
    }

    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
