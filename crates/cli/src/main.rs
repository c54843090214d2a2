//! marksync command-line tool.
//!
//! Syncs a local bookmark file against the configured shared snapshot and
//! inspects or restores the per-owner version history.

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use marksync_core::config::AppConfig;
use marksync_core::conflict::{DeleteResolution, ResolutionStrategy};
use marksync_core::db::Database;
use marksync_core::ledger::{LedgerStore, VersionLedger};
use marksync_core::models::{SyncRequest, SyncStatus};
use marksync_core::plan::Feature;
use marksync_core::source::{BookmarkFile, LocalFileSource, SourceType, SyncSource};
use marksync_core::sync_engine::SyncEngine;
use marksync_core::tree::BookmarkTree;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// marksync command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "marksync",
    version,
    about = "Sync bookmark trees across devices with conflict resolution and version history"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "marksync.toml")]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./marksync.toml")]
        output: PathBuf,

        /// Owner (account) name to write into the config.
        #[arg(long, default_value = "me")]
        owner: String,
    },

    /// Validate a configuration file.
    Validate,

    /// Sync a local bookmark file with the shared snapshot.
    Sync {
        /// Local bookmark tree (JSON). Created from the merge result if absent.
        #[arg(short, long)]
        local: PathBuf,

        /// Conflict strategy: local, remote, merged, newest.
        #[arg(long)]
        strategy: Option<ResolutionStrategy>,

        /// Delete-vs-modify handling: keep, delete.
        #[arg(long)]
        delete_resolution: Option<DeleteResolution>,

        /// Run the full pipeline even if nothing appears to have changed.
        #[arg(long)]
        force: bool,

        /// Compute the merge without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the sync result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the remote snapshot and ledger state.
    Status,

    /// List recorded versions, newest first.
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one recorded version.
    Show {
        version: u64,

        /// Print the full bookmark tree as JSON.
        #[arg(long)]
        tree: bool,
    },

    /// Restore a recorded version as the new head.
    Rollback { version: u64 },

    /// Print the checksum of a bookmark file.
    Checksum { file: PathBuf },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins, then `--log-level`, then the config file, then `warn`.
fn init_tracing(cli: &Cli) {
    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&cli.config)
                .ok()
                .map(|c| c.logging.level)
        })
        .unwrap_or_else(|| "warn".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output, owner } => cmd_init(&output, &owner),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Checksum { file } => cmd_checksum(&file),
        command => {
            // Everything else needs a valid config, the ledger and the source.
            let config = load_config(&cli.config)?;
            let app = App::open(config)?;

            match command {
                Commands::Sync {
                    local,
                    strategy,
                    delete_resolution,
                    force,
                    dry_run,
                    json,
                } => {
                    let opts = SyncOpts {
                        strategy,
                        delete_resolution,
                        force,
                        dry_run,
                        json,
                    };
                    cmd_sync(&app, &local, opts).await
                }
                Commands::Status => cmd_status(&app).await,
                Commands::History { limit, offset } => cmd_history(&app, limit, offset).await,
                Commands::Show { version, tree } => cmd_show(&app, version, tree).await,
                Commands::Rollback { version } => cmd_rollback(&app, version).await,
                Commands::Init { .. } | Commands::Validate | Commands::Checksum { .. } => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_validate(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Everything a ledger- or source-backed command needs.
struct App {
    config: AppConfig,
    db: Arc<Database>,
    engine: SyncEngine,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        let db = Database::open(&config.ledger.database).with_context(|| {
            format!("failed to open ledger database {}", config.ledger.database.display())
        })?;
        let db = Arc::new(db);

        let store: Arc<dyn LedgerStore> = db.clone();
        let ledger = VersionLedger::new(store, config.retention());
        let source = open_source(&config)?;
        let engine = SyncEngine::new(source, ledger, config.engine_options());

        Ok(Self { config, db, engine })
    }
}

fn open_source(config: &AppConfig) -> Result<Arc<dyn SyncSource>> {
    match config.source.kind {
        SourceType::LocalFile => {
            let mut source = LocalFileSource::new(&config.source.path);
            if let Some(name) = &config.source.name {
                source = source.with_name(name);
            }
            Ok(Arc::new(source))
        }
        other => anyhow::bail!("source kind '{}' is not supported by the command-line tool", other),
    }
}

/// Local tree for `sync`; `None` when the file does not exist yet.
fn read_local(path: &Path) -> Result<Option<BookmarkTree>> {
    if !path.exists() {
        debug!(path = %path.display(), "local file missing, pulling the remote snapshot");
        return Ok(None);
    }
    read_tree(path).map(Some)
}

/// Read a bookmark tree from a plain tree file or a full snapshot file.
fn read_tree(path: &Path) -> Result<BookmarkTree> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(tree) = serde_json::from_str::<BookmarkTree>(&content) {
        return Ok(tree);
    }
    let file: BookmarkFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is neither a bookmark tree nor a snapshot", path.display()))?;
    Ok(file.bookmarks)
}

fn write_tree(path: &Path, tree: &BookmarkTree) -> Result<()> {
    let json = serde_json::to_string_pretty(tree).context("failed to serialize bookmark tree")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path, owner: &str) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let database = AppConfig::default().ledger.database;
    let template = format!(
        r#"# marksync configuration

[sync]
owner = "{owner}"
# device_id = "laptop-01"
# device_name = "Work laptop"
default_strategy = "newest"   # local | remote | merged | newest
delete_resolution = "keep"    # keep | delete
max_write_attempts = 3

[ledger]
database = "{database}"
plan = "free"                 # free | pro | team
# max_versions = 10

[source]
kind = "local_file"
path = "/path/to/shared/bookmarks.json"
# name = "shared drive"

[logging]
level = "info"
"#,
        database = database.display()
    );

    std::fs::write(output, template).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Point [source] path at the shared snapshot file");
    println!("  2. Validate with: marksync validate --config {}", output.display());
    println!(
        "  3. Sync with:     marksync --config {} sync --local bookmarks.json",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Owner          : {}", config.sync.owner);
    println!("  Device         : {}", config.sync.device_name.as_deref().unwrap_or("-"));
    println!("  Strategy       : {}", config.sync.default_strategy);
    println!("  Delete handling: {}", config.sync.delete_resolution);
    println!("  Plan           : {}", config.ledger.plan);
    println!("  Kept versions  : {}", config.retention().limit());
    println!("  Ledger         : {}", config.ledger.database.display());
    println!("  Source         : {} ({})", config.source.path.display(), config.source.kind);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_checksum(file: &Path) -> Result<()> {
    let tree = read_tree(file)?;
    tree.validate().context("bookmark tree is invalid")?;
    let checksum = tree.checksum().context("failed to hash bookmark tree")?;

    println!("{}", checksum);
    println!("  nodes     : {}", tree.node_count());
    println!("  bookmarks : {}", tree.bookmark_count());
    Ok(())
}

struct SyncOpts {
    strategy: Option<ResolutionStrategy>,
    delete_resolution: Option<DeleteResolution>,
    force: bool,
    dry_run: bool,
    json: bool,
}

async fn cmd_sync(app: &App, local_path: &Path, opts: SyncOpts) -> Result<()> {
    let owner = app.config.owner();
    let local = read_local(local_path)?;
    let previous = app
        .db
        .last_synced_checksum(&owner)
        .context("failed to read last synced checksum")?;

    let request = SyncRequest::for_local(owner.clone(), local, previous)
        .with_strategy(opts.strategy.unwrap_or(app.config.sync.default_strategy))
        .with_delete_resolution(
            opts.delete_resolution
                .unwrap_or(app.config.sync.delete_resolution),
        )
        .force(opts.force)
        .dry_run(opts.dry_run);

    let result = app.engine.run(&request).await;

    if opts.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        output::print_sync_result(&result);
    }

    if result.status == SyncStatus::Error {
        anyhow::bail!(
            "sync failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    if !result.dry_run {
        if let Some(merged) = &result.merged {
            write_tree(local_path, merged)?;
        }
        if let Some(checksum) = &result.checksum {
            app.db
                .set_last_synced_checksum(&owner, checksum)
                .context("failed to record synced checksum")?;
        }
    }
    Ok(())
}

async fn cmd_status(app: &App) -> Result<()> {
    let owner = app.config.owner();
    let ledger = app.engine.ledger();
    let latest = ledger.latest(&owner).await.context("failed to read ledger")?;
    let count = ledger.count(&owner).await.context("failed to count versions")?;
    let last_synced = app
        .db
        .last_synced_checksum(&owner)
        .context("failed to read last synced checksum")?;
    let remote = app.engine.source().read().await;

    println!("marksync status");
    println!("===============");
    println!();
    println!("  Owner           : {}", owner);
    println!("  Plan            : {}", app.config.ledger.plan);
    println!("  Source          : {}", app.engine.source().name());
    match remote {
        Ok(file) => {
            println!("  Remote version  : {}", file.version);
            println!("  Remote checksum : {}", file.metadata.checksum.short());
            println!(
                "  Last written by : {}",
                file.metadata.last_synced_by.as_deref().unwrap_or("-")
            );
            println!("  Last modified   : {}", file.metadata.last_modified.to_rfc3339());
        }
        Err(e) => println!("  Remote          : {}", e),
    }
    println!(
        "  Last synced     : {}",
        last_synced.as_ref().map(|c| c.short()).unwrap_or("never")
    );
    println!(
        "  Ledger head     : {}",
        latest
            .map(|r| format!("v{} ({})", r.version, r.created_at.to_rfc3339()))
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "  Kept versions   : {} of {}",
        count,
        ledger.retention().limit()
    );
    Ok(())
}

async fn cmd_history(app: &App, limit: usize, offset: usize) -> Result<()> {
    ensure_allowed(app, Feature::VersionHistory)?;
    let versions = app
        .engine
        .ledger()
        .get_history(&app.config.owner(), limit, offset)
        .await
        .context("failed to list versions")?;

    if versions.is_empty() {
        println!("No versions recorded.");
        return Ok(());
    }
    output::print_history(&versions);
    Ok(())
}

async fn cmd_show(app: &App, version: u64, tree: bool) -> Result<()> {
    ensure_allowed(app, Feature::VersionHistory)?;
    let record = app
        .engine
        .ledger()
        .get_version(&app.config.owner(), version)
        .await
        .context("failed to load version")?;

    if tree {
        println!(
            "{}",
            serde_json::to_string_pretty(&record.bookmark_data).context("failed to serialize tree")?
        );
    } else {
        output::print_version(&record);
    }
    Ok(())
}

async fn cmd_rollback(app: &App, version: u64) -> Result<()> {
    ensure_allowed(app, Feature::Rollback)?;
    let owner = app.config.owner();
    let record = app
        .engine
        .restore(&owner, version)
        .await
        .with_context(|| format!("failed to restore version {version}"))?;

    println!(
        "Restored version {} as version {} ({})",
        version, record.version, record.change_summary
    );
    println!("Run `marksync sync` on each device to pick up the restored tree.");
    Ok(())
}

fn ensure_allowed(app: &App, feature: Feature) -> Result<()> {
    let plan = app.config.ledger.plan;
    if !plan.allows(feature) {
        anyhow::bail!("{} is not available on the {} plan", feature, plan);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_core::source::MemorySource;
    use marksync_core::tree::BookmarkNode;

    fn app_with(source: Arc<MemorySource>) -> App {
        let mut config = AppConfig::default();
        config.sync.owner = "alice".into();
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let db = Arc::new(db);
        let store: Arc<dyn LedgerStore> = db.clone();
        let ledger = VersionLedger::new(store, config.retention());
        let engine = SyncEngine::new(source, ledger, config.engine_options());
        App { config, db, engine }
    }

    fn opts() -> SyncOpts {
        SyncOpts {
            strategy: None,
            delete_resolution: None,
            force: false,
            dry_run: false,
            json: true,
        }
    }

    #[test]
    fn test_read_local_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_local(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_into_new_local_file_keeps_remote() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MemorySource::new("remote"));
        let app = app_with(source.clone());
        let owner = app.config.owner();

        let mut tree = BookmarkTree::empty();
        *tree.toolbar.children_mut().unwrap() = vec![
            BookmarkNode::bookmark("https://a.com", "A"),
            BookmarkNode::bookmark("https://b.com", "B"),
        ];
        let seeded = dir.path().join("seeded.json");
        write_tree(&seeded, &tree).unwrap();
        cmd_sync(&app, &seeded, opts()).await.unwrap();
        assert!(app.db.last_synced_checksum(&owner).unwrap().is_some());

        // Same device, new path: the remembered checksum must not turn the
        // empty local side into a mass deletion.
        let fresh = dir.path().join("fresh.json");
        cmd_sync(&app, &fresh, opts()).await.unwrap();

        let remote = source.snapshot().await.unwrap();
        assert_eq!(remote.bookmarks.bookmark_count(), 2);
        assert_eq!(read_tree(&fresh).unwrap().bookmark_count(), 2);
    }
}
