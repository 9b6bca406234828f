//! sharesync CLI - Command line interface for a share's engine
//!
//! Works directly on one engine directory: store files, read them back,
//! delete them, and merge another engine's snapshot. `sync` runs a full
//! share against the cloud service.

use clap::{Parser, Subcommand};
use sharesync::{Eft, ItemInfo, ItemKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sharesync")]
#[command(about = "Directory sync over content-addressed, mergeable snapshots")]
#[command(version)]
struct Cli {
    /// Path to the engine directory
    #[arg(short = 'd', long, default_value = ".sharesync")]
    dir: PathBuf,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty engine directory
    Init,

    /// Store a file (or symlink) under a share-relative path
    Put {
        /// File on disk
        file: PathBuf,
        /// Path inside the share
        path: String,
    },

    /// Write a stored path to a file
    Get {
        /// Path inside the share
        path: String,
        /// Destination on disk
        dest: PathBuf,
    },

    /// Show the metadata of a stored path
    Info {
        /// Path inside the share
        path: String,
    },

    /// List all stored paths
    Ls,

    /// Delete a stored path
    Rm {
        /// Path inside the share
        path: String,
    },

    /// Merge another engine directory's snapshot into this one
    Merge {
        /// The other engine directory
        other: PathBuf,
    },

    /// Show blocks that the next upload would send and drop
    Checkpoint,

    /// Show engine status
    Status,

    /// Scan a directory and upload it to the cloud share (needs SHARESYNC_API_URL)
    #[cfg(feature = "sync")]
    Sync {
        /// Share name
        share: String,
        /// Directory to synchronize
        root: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let eft = Eft::open(&cli.dir)?;
            eft.sync()?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "message": format!("Initialized engine at {}", cli.dir.display()),
                    "snapshots": eft.snapshot_list_hash()?.to_hex()
                }),
            )?;
        }

        Commands::Put { file, path } => {
            let eft = Eft::open(&cli.dir)?;
            let meta = std::fs::symlink_metadata(&file)?;
            let info = ItemInfo::from_metadata(&path, &meta)?;

            let stored = match info.kind {
                ItemKind::File => eft.put(info, &file)?,
                ItemKind::Symlink => {
                    let staged = eft.dir().join("cli-staged");
                    std::fs::write(&staged, sharesync::eft::read_link_bytes(&file)?)?;
                    let stored = eft.put(info, &staged);
                    std::fs::remove_file(&staged)?;
                    stored?
                }
            };
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "item": item_json(&stored)
                }),
            )?;
        }

        Commands::Get { path, dest } => {
            let eft = Eft::open(&cli.dir)?;
            match eft.get(&path, &dest) {
                Ok(info) => output(
                    cli.format,
                    &serde_json::json!({
                        "status": "ok",
                        "item": item_json(&info),
                        "dest": dest.display().to_string()
                    }),
                )?,
                Err(e) if e.is_not_found() => not_found(cli.format, &path)?,
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Info { path } => {
            let eft = Eft::open(&cli.dir)?;
            match eft.get_info(&path) {
                Ok(info) => output(cli.format, &item_json(&info))?,
                Err(e) if e.is_not_found() => not_found(cli.format, &path)?,
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Ls => {
            let eft = Eft::open(&cli.dir)?;
            let items: Vec<_> = eft.list()?.iter().map(item_json).collect();
            output(
                cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "items": items
                }),
            )?;
        }

        Commands::Rm { path } => {
            let eft = Eft::open(&cli.dir)?;
            match eft.delete(&path) {
                Ok(()) => output(
                    cli.format,
                    &serde_json::json!({
                        "status": "ok",
                        "path": path
                    }),
                )?,
                Err(e) if e.is_not_found() => not_found(cli.format, &path)?,
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Merge { other } => {
            if !other.join(sharesync::eft::STORE_FILE).exists() {
                anyhow::bail!("{} is not an engine directory", other.display());
            }
            let other = Arc::new(Eft::open(&other)?);
            let remote_hash = other.snapshot_list_hash()?;

            let eft = Eft::open(&cli.dir)?.with_remote(other);
            let merged = eft.merge_remote(&remote_hash)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "root": merged.root.to_hex(),
                    "snapshots": eft.snapshot_list_hash()?.to_hex(),
                    "items": eft.list()?.len()
                }),
            )?;
        }

        Commands::Checkpoint => {
            let eft = Eft::open(&cli.dir)?;
            let checkpoint = eft.make_checkpoint();
            output(
                cli.format,
                &serde_json::json!({
                    "adds": checkpoint.adds.iter().map(|h| h.to_hex()).collect::<Vec<_>>(),
                    "dels": checkpoint.dels.iter().map(|h| h.to_hex()).collect::<Vec<_>>()
                }),
            )?;
        }

        Commands::Status => {
            let eft = Eft::open(&cli.dir)?;
            let head = eft.head()?;
            let checkpoint = eft.make_checkpoint();
            output(
                cli.format,
                &serde_json::json!({
                    "dir": cli.dir.display().to_string(),
                    "root": if head.is_empty() { "".to_string() } else { head.root.to_hex() },
                    "snapshots": eft.snapshot_list_hash()?.to_hex(),
                    "items": eft.list()?.len(),
                    "objects": eft.store().object_count(),
                    "pending_adds": checkpoint.adds.len(),
                    "pending_dels": checkpoint.dels.len()
                }),
            )?;
        }

        #[cfg(feature = "sync")]
        Commands::Sync { share, root } => {
            let report = run_sync(&share, &root)?;
            output(
                cli.format,
                &serde_json::json!({
                    "status": "ok",
                    "share": share,
                    "scanned": report.0,
                    "snapshots": report.1.to_hex()
                }),
            )?;
        }
    }

    Ok(())
}

/// Scan `root`, then drain one debounced upload through the cloud service
#[cfg(feature = "sync")]
fn run_sync(name: &str, root: &std::path::Path) -> anyhow::Result<(usize, sharesync::Hash)> {
    use sharesync::{CloudTransport, HttpCloud, Settings, Share, ShareConfig, Uploader};

    let settings = Settings::from_env()?;
    let api_url = settings
        .api_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("SHARESYNC_API_URL is not set"))?;

    let config = ShareConfig::load_or_new(&settings.config_dir, name)?;
    let cloud: Arc<dyn CloudTransport> =
        Arc::new(HttpCloud::new(api_url, settings.api_token.clone())?);
    let share = Arc::new(Share::open(
        config,
        root,
        settings.share_data_dir(name),
        Some(cloud),
    )?);

    let scanned = share.scan()?;

    // The blocking HTTP client must outlive the runtime, so `share` stays here
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let uploader = Uploader::spawn(share.clone(), settings.upload_delay);
        uploader.trigger().again();
        uploader.shutdown().await
    })?;
    drop(runtime);

    Ok((scanned, share.eft().snapshot_list_hash()?))
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env("SHARESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn item_json(info: &ItemInfo) -> serde_json::Value {
    serde_json::json!({
        "path": info.path,
        "kind": match info.kind {
            ItemKind::File => "file",
            ItemKind::Symlink => "symlink",
        },
        "mod_time": info.mod_time,
        "size": info.size,
        "mode": info.mode,
        "content_hash": info.content_hash.to_hex()
    })
}

fn not_found(format: OutputFormat, path: &str) -> anyhow::Result<()> {
    output(
        format,
        &serde_json::json!({
            "status": "error",
            "message": format!("Path not found: {}", path)
        }),
    )?;
    std::process::exit(1);
}

fn output(format: OutputFormat, value: &serde_json::Value) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
