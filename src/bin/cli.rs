//! FieldSync CLI
//!
//! Inspection and maintenance of a device's staging database.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fieldsync::error::Result;
use fieldsync::storage::{RemoteCache, StagingStore, Storage, SCHEMA_VERSION};
use fieldsync::types::*;

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Offline staging store inspection CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "FIELDSYNC_DB_PATH",
        default_value = "~/.local/share/fieldsync/staging.db"
    )]
    db_path: String,

    /// Storage mode (local, cloud-safe)
    #[arg(long, env = "FIELDSYNC_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count unsynced records per entity type
    Pending,
    /// List staged records of one entity type
    List {
        /// Entity type (logs, profiles, emergencies, arrival-alerts)
        entity: String,
        /// Only records owned by this user
        #[arg(short, long)]
        user: Option<String>,
        /// Hide records already confirmed by the remote store
        #[arg(short, long)]
        pending_only: bool,
    },
    /// Delete synced rows from the pending logs table
    PurgeSyncedLogs,
    /// Show staging and cache statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();

    let storage_mode = match cli.storage_mode.as_str() {
        "cloud-safe" => StorageMode::CloudSafe,
        _ => StorageMode::Local,
    };

    let storage = Storage::open(StagingConfig {
        db_path,
        storage_mode,
    })?;
    let staging = StagingStore::new(storage.clone());

    match cli.command {
        Commands::Pending => {
            let counts = staging.pending_counts()?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }

        Commands::List {
            entity,
            user,
            pending_only,
        } => {
            let kind: EntityKind = entity.parse().map_err(fieldsync::FieldSyncError::InvalidInput)?;
            let rows = staging.rows(kind, user.as_deref())?;
            for row in rows.iter().filter(|r| !pending_only || !r.synced) {
                let status = match &row.server_id {
                    Some(server_id) if row.synced => format!("synced as {}", server_id),
                    _ => "pending".to_string(),
                };
                println!(
                    "#{} [{}] {} - {}",
                    row.local_id,
                    row.created_at.format("%Y-%m-%d %H:%M:%S"),
                    status,
                    truncate(&row.payload.to_string(), 60)
                );
            }
        }

        Commands::PurgeSyncedLogs => {
            let deleted = staging.purge_synced_logs()?;
            println!("Purged {} synced log(s)", deleted);
        }

        Commands::Stats => {
            let counts = staging.pending_counts()?;
            let cache = RemoteCache::new(storage.clone());

            println!("Database: {}", storage.db_path());
            println!("Journal: {}", storage.journal_mode()?);
            println!("Schema version: {}", SCHEMA_VERSION);
            println!("{:<16} {:>8} {:>8} {:>8}", "entity", "pending", "staged", "cached");
            for kind in EntityKind::ALL {
                let staged = staging.rows(kind, None)?.len();
                let cached = cache.list(kind, None)?.len();
                println!(
                    "{:<16} {:>8} {:>8} {:>8}",
                    kind.as_str(),
                    counts.get(kind),
                    staged,
                    cached
                );
            }
            println!("Total pending: {}", counts.total);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays pipeable
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
