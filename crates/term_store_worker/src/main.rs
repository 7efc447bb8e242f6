//! term_store_worker - standalone cleanup worker for the term store.
//!
//! Reads config from flags or env vars (a `.env` file is honoured):
//!   TERM_STORE_DATABASE_URL           Postgres connection string (required)
//!   TERM_STORE_DISPATCHER_INTERVAL_MS  poll interval when idle (default: 500)
//!   TERM_STORE_DISPATCHER_MAX_FAILS    attempts before dead-letter (default: 5)
//!   TERM_STORE_ORPHAN_SWEEP_LIMIT      orphans per sweep, 0 = off (default: 0)
//!
//! See `config::Args` for the full list.

mod config;

use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use term_store_core::cleanup::CleanupDispatcher;
use term_store_core::mapping::LinkTableRegistry;
use term_store_core::ports::{CleanupJobQueue, TermInLangIdsCleaner};
use term_store_postgres::{apply_migrations, PgStores};

use crate::config::Args;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,term_store_worker=debug,term_store_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .connect(&args.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("Connected to database");

    if args.run_migrations {
        apply_migrations(&pool)
            .await
            .unwrap_or_else(|e| panic!("failed to apply migrations: {e}"));
    }

    let stores = PgStores::new(pool.clone(), LinkTableRegistry::standard());
    let queue: Arc<dyn CleanupJobQueue> = Arc::new(stores.queue);
    let cleaner: Arc<dyn TermInLangIdsCleaner> = Arc::new(stores.cleaner);

    let dispatcher = CleanupDispatcher::new(queue, cleaner, args.policy());

    // An interrupted job keeps its claim until the timeout, then is retried.
    tokio::select! {
        _ = dispatcher.run() => {}
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
        },
    }

    pool.close().await;
    tracing::info!("term_store_worker stopped");
}
