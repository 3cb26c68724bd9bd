mod cli;
mod http;

use anyhow::Context;
use backup_core::{Engine, HealthEvaluator, MongoSource, RocksStatusStore, S3Sink, Scheduler};
use clap::Parser;
use cli::{Cli, Command};
use cli_common::{init_logging, OrBail};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_args);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")
        .or_bail("failed to start");

    let result = runtime.block_on(run(cli));
    runtime.shutdown_background();

    result.or_bail("mongobackup failed");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let collections = backup_core::parse_collections(&cli.global.collections)
        .context("parsing --collections")?;

    let source = MongoSource::connect(
        &cli.global.mongo_uri,
        Duration::from_secs(cli.global.connect_timeout_secs),
    )
    .await
    .context("connecting to mongodb")?;

    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_sdk_s3::config::Region::new(
            cli.global.bucket_region.clone(),
        ))
        .load()
        .await;
    let s3_client = aws_sdk_s3::Client::new(&aws_config);
    let sink = S3Sink::new(s3_client, cli.global.bucket.clone());

    let engine = Arc::new(
        Engine::new(Arc::new(source), Arc::new(sink), cli.global.base_dir.clone())
            .with_rate_limit(Duration::from_millis(cli.global.rate_limit_ms))
            .with_batch_limit(cli.global.batch_limit_bytes),
    );

    match cli.command {
        Command::ScheduledBackup(args) => run_scheduled_backup(engine, collections, args).await,
        Command::Backup(args) => run_backup(engine, collections, args).await,
        Command::Restore(args) => run_restore(engine, collections, args).await,
    }
}

async fn run_backup(
    engine: Arc<Engine<MongoSource, S3Sink>>,
    collections: Vec<backup_core::Coll>,
    args: cli::BackupArgs,
) -> anyhow::Result<()> {
    let status =
        RocksStatusStore::open(&args.status_store).context("opening status store")?;
    let cancel = CancellationToken::new();
    engine
        .backup(&cancel, &collections, &status)
        .await
        .context("backup failed")?;
    Ok(())
}

async fn run_restore(
    engine: Arc<Engine<MongoSource, S3Sink>>,
    collections: Vec<backup_core::Coll>,
    args: cli::RestoreArgs,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    engine
        .restore(&cancel, &args.timestamp, &collections)
        .await
        .context("restore failed")?;
    Ok(())
}

async fn run_scheduled_backup(
    engine: Arc<Engine<MongoSource, S3Sink>>,
    collections: Vec<backup_core::Coll>,
    args: cli::ScheduledBackupArgs,
) -> anyhow::Result<()> {
    let status = Arc::new(
        RocksStatusStore::open(&args.status_store).context("opening status store")?,
    );

    let health = HealthEvaluator::new(
        status.clone(),
        collections.clone(),
        args.health_horizon_hours,
    );
    let app = http::router(health);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port))
        .await
        .context("binding health listener")?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let serve = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });

    let scheduler = Scheduler::new(engine, status, collections);
    let cron = args.cron.clone();
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(&cron, args.run_at_start, scheduler_cancel)
            .await
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    scheduler_task
        .await
        .context("scheduler task panicked")?
        .context("scheduler failed")?;
    serve
        .await
        .context("http server task panicked")?
        .context("http server failed")?;
    Ok(())
}
