//! CLI surface: one set of global options shared by all subcommands, plus
//! per-subcommand options. Every global option is also settable through its
//! matching `MONGOBACKUP_*` environment variable.

use clap::{Args, Parser, Subcommand};
use cli_common::LogArgs;

#[derive(Debug, Parser)]
#[clap(name = "mongobackup", author, version)]
pub struct Cli {
    #[clap(flatten)]
    pub log_args: LogArgs,

    #[clap(flatten)]
    pub global: GlobalArgs,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// MongoDB connection string (e.g. mongodb://host:27017).
    #[clap(long, env = "MONGOBACKUP_MONGO_URI")]
    pub mongo_uri: String,

    /// S3-compatible bucket name artifacts are read from and written to.
    #[clap(long, env = "MONGOBACKUP_BUCKET")]
    pub bucket: String,

    /// Region of the object store bucket.
    #[clap(long, env = "MONGOBACKUP_BUCKET_REGION")]
    pub bucket_region: String,

    /// Base directory prefix under which artifacts are stored.
    #[clap(long, env = "MONGOBACKUP_BASE_DIR", default_value = "backups")]
    pub base_dir: String,

    /// Comma-separated `<db>/<collection>,<db>/<collection>,...` list.
    #[clap(long, env = "MONGOBACKUP_COLLECTIONS")]
    pub collections: String,

    /// Seconds to wait for the initial database connection.
    #[clap(long, env = "MONGOBACKUP_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Minimum milliseconds between successive restore batches.
    #[clap(long, env = "MONGOBACKUP_RATE_LIMIT_MS", default_value_t = 250)]
    pub rate_limit_ms: u64,

    /// Maximum bytes accumulated per restore batch before a bulk insert.
    #[clap(
        long,
        env = "MONGOBACKUP_BATCH_LIMIT_BYTES",
        default_value_t = backup_core::engine::DEFAULT_BATCH_LIMIT
    )]
    pub batch_limit_bytes: usize,
}

#[derive(Debug, Subcommand)]
#[clap(rename_all = "kebab-case")]
pub enum Command {
    /// Runs backups on a cron schedule and serves health endpoints.
    ScheduledBackup(ScheduledBackupArgs),
    /// Runs a single backup of every configured collection.
    Backup(BackupArgs),
    /// Runs a single restore of every configured collection from a given run.
    Restore(RestoreArgs),
}

#[derive(Debug, Args)]
pub struct ScheduledBackupArgs {
    /// Standard 5-field cron expression, evaluated in local time.
    #[clap(long, env = "MONGOBACKUP_CRON")]
    pub cron: String,

    /// Path to the local status-store file.
    #[clap(long, env = "MONGOBACKUP_STATUS_STORE")]
    pub status_store: std::path::PathBuf,

    /// Run a backup immediately before registering the cron recurrence.
    #[clap(long, env = "MONGOBACKUP_RUN_AT_START")]
    pub run_at_start: bool,

    /// Staleness horizon, in hours, for the health endpoints.
    #[clap(long, env = "MONGOBACKUP_HEALTH_HORIZON_HOURS", default_value_t = 24)]
    pub health_horizon_hours: i64,

    /// Port the health HTTP listener binds to.
    #[clap(long, env = "MONGOBACKUP_HTTP_PORT", default_value_t = 8080)]
    pub http_port: u16,
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Path to the local status-store file.
    #[clap(long, env = "MONGOBACKUP_STATUS_STORE")]
    pub status_store: std::path::PathBuf,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// The run's timestamp directory name, e.g. `2023-01-01T00-00-00`.
    #[clap(long)]
    pub timestamp: String,
}
