// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use schemars::schema_for;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use wsync_auth::{Authenticator, SoapAuthTransport, Token};
use wsync_config::WsyncConfig;
use wsync_content::{ContentStore, HttpContentTransport, UrlRewritePolicy};
use wsync_error::CancelToken;
use wsync_filter::MetadataFilter;
use wsync_identity::PackageId;
use wsync_protocol::{CrossLinkedPackage, SoapTransport, SourceFilter, SyncEngine, SyncKind};
use wsync_store::Store;

mod session;

use session::SyncSession;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;
/// Exit code for usage / argument errors (clap exits with 2 automatically).
#[allow(dead_code)]
const EXIT_USAGE_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "wsyncd", version, about = "MS-WSUSSS sync client and downstream-server core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging regardless of the config's log_level.
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run getCategories then getUpdates against the upstream endpoint,
    /// committing results to the local metadata store.
    Sync {
        /// Path to the wsyncd TOML configuration file.
        #[arg(long, default_value = "wsyncd.toml")]
        config: PathBuf,

        /// Override the upstream sync endpoint URL.
        #[arg(long)]
        endpoint: Option<String>,

        /// Override the upstream authentication endpoint URL.
        #[arg(long)]
        auth_endpoint: Option<String>,

        /// Only run getCategories; skip getUpdates and content download.
        #[arg(long)]
        categories_only: bool,

        /// Skip downloading content for synced updates.
        #[arg(long)]
        no_content: bool,
    },

    /// Stream a filtered copy of the store's raw update metadata.
    Export {
        /// Path to the wsyncd TOML configuration file.
        #[arg(long, default_value = "wsyncd.toml")]
        config: PathBuf,

        /// Destination path; defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Path to a JSON file overriding the config's updates_filter.
        #[arg(long)]
        filter: Option<PathBuf>,
    },

    /// Write a cab-packaged cartridge of the given updates (plus their
    /// prerequisite/bundled closure) for import with WsusUtil.exe.
    Cartridge {
        /// Path to the wsyncd TOML configuration file.
        #[arg(long, default_value = "wsyncd.toml")]
        config: PathBuf,

        /// Update uuid to include (repeatable). Each is resolved to its
        /// latest revision in the store.
        #[arg(long = "id", required = true)]
        ids: Vec<Uuid>,

        /// Destination .cab path.
        #[arg(long)]
        out: PathBuf,
    },

    /// Print a JSON schema to stdout.
    Schema {
        /// Which schema to print.
        #[arg(value_enum)]
        kind: SchemaArg,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum SchemaArg {
    /// WsyncConfig schema.
    Config,
    /// MetadataFilter schema.
    Filter,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("wsync=debug,wsync_protocol=debug,wsync_auth=debug")
    } else {
        EnvFilter::new("wsync=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Sync {
            config,
            endpoint,
            auth_endpoint,
            categories_only,
            no_content,
        } => cmd_sync(&config, endpoint, auth_endpoint, categories_only, no_content).await,
        Commands::Export { config, out, filter } => cmd_export(&config, out.as_deref(), filter.as_deref()),
        Commands::Cartridge { config, ids, out } => cmd_cartridge(&config, &ids, &out).await,
        Commands::Schema { kind } => cmd_schema(kind),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

fn load_config(path: &Path) -> Result<WsyncConfig> {
    let config = WsyncConfig::from_toml_file(path)
        .with_context(|| format!("load config from {}", path.display()))?;
    for warning in config.warnings() {
        tracing::warn!(target: "wsyncd", "{warning}");
    }
    Ok(config)
}

async fn cmd_sync(
    config_path: &Path,
    endpoint: Option<String>,
    auth_endpoint: Option<String>,
    categories_only: bool,
    no_content: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let endpoint = endpoint.unwrap_or_else(|| wsync_protocol::DEFAULT_UPSTREAM_ENDPOINT.to_string());
    let auth_endpoint = auth_endpoint.unwrap_or_else(|| endpoint.clone());

    let mut store = Store::open_or_create(&config.metadata_path)
        .with_context(|| format!("open store at {}", config.metadata_path.display()))?;

    let session_path = session::session_path_for(&config.metadata_path);
    let mut session = SyncSession::load(&session_path).unwrap_or_default();

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.batch_http_timeout_secs))
        .build()
        .context("build HTTP client")?;

    let auth_transport = SoapAuthTransport::new(client.clone(), auth_endpoint);
    let authenticator = Authenticator::new(auth_transport);
    let token: Token = authenticator
        .authenticate(session.token.clone(), Utc::now())
        .await
        .context("authenticate against upstream")?;
    session.token = Some(token.clone());

    let sync_transport = SoapTransport::new(client, endpoint);
    let engine = SyncEngine::new(sync_transport, config.batch_retry.max_attempts);
    let cancel = CancelToken::new();

    let (categories, categories_anchor) = engine
        .get_categories(
            &token,
            session.categories_anchor.as_deref(),
            &session.known_products,
            &session.known_classifications,
            |progress| log_progress(progress.kind, progress.current, progress.total),
            &cancel,
        )
        .await
        .context("getCategories")?;
    absorb_categories(&mut session, &categories);
    let category_count = categories.len();
    commit_packages(&mut store, categories)?;
    session.categories_anchor = Some(categories_anchor);
    session.save(&session_path)?;
    tracing::info!(target: "wsyncd", count = category_count, "synced categories");

    if categories_only {
        return Ok(());
    }

    let source_filter = SourceFilter {
        product_ids: session.known_products.iter().copied().collect(),
        classification_ids: session.known_classifications.iter().copied().collect(),
    };

    let (updates, updates_anchor) = engine
        .get_updates(
            &token,
            &source_filter,
            session.updates_anchor.as_deref(),
            &session.known_products,
            &session.known_classifications,
            |progress| log_progress(progress.kind, progress.current, progress.total),
            &cancel,
        )
        .await
        .context("getUpdates")?;
    let update_count = updates.len();
    let all_files: Vec<_> = updates
        .iter()
        .flat_map(|u| u.package.common().files.clone())
        .collect();
    commit_packages(&mut store, updates)?;
    session.updates_anchor = Some(updates_anchor);
    session.save(&session_path)?;
    tracing::info!(target: "wsyncd", count = update_count, "synced updates");

    if !no_content && !all_files.is_empty() {
        let transport = HttpContentTransport::new(std::time::Duration::from_secs(config.batch_http_timeout_secs))
            .context("build content transport")?;
        let content = ContentStore::with_parallelism(
            &config.content_path,
            transport,
            UrlRewritePolicy::PreferMu,
            config.download_parallelism,
        );
        let report = content.download(&all_files, &cancel).await.context("download content")?;
        tracing::info!(
            target: "wsyncd",
            downloaded = report.downloaded,
            already_present = report.already_present,
            bytes = content.downloaded_size(),
            "downloaded content"
        );
    }

    Ok(())
}

fn log_progress(kind: SyncKind, current: u64, total: u64) {
    tracing::debug!(target: "wsyncd", ?kind, current, total, "sync progress");
}

fn absorb_categories(session: &mut SyncSession, packages: &[CrossLinkedPackage]) {
    for linked in packages {
        match &linked.package {
            wsync_metadata::Package::ProductCategory(_) => {
                session.known_products.insert(linked.package.id().uuid);
            }
            wsync_metadata::Package::ClassificationCategory(_) => {
                session.known_classifications.insert(linked.package.id().uuid);
            }
            _ => {}
        }
    }
}

fn commit_packages(store: &mut Store, packages: Vec<CrossLinkedPackage>) -> Result<()> {
    for linked in packages {
        store.add(linked.package, linked.raw_xml);
    }
    store.commit().context("commit synced packages")?;
    Ok(())
}

fn cmd_export(config_path: &Path, out: Option<&Path>, filter_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = Store::open(&config.metadata_path)
        .with_context(|| format!("open store at {}", config.metadata_path.display()))?;

    let filter = match filter_path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("read filter file {}", path.display()))?;
            serde_json::from_str::<MetadataFilter>(&contents)
                .with_context(|| format!("parse filter file {}", path.display()))?
        }
        None => config.updates_filter.unwrap_or_else(MetadataFilter::all),
    };

    let cancel = CancelToken::new();
    let mut sink: Box<dyn std::io::Write> = match out {
        Some(path) => Box::new(std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?),
        None => Box::new(std::io::stdout()),
    };
    let exported = store.copy_to(&mut sink, &filter, &cancel).context("copy_to")?;
    tracing::info!(target: "wsyncd", exported, "exported filtered metadata");
    Ok(())
}

async fn cmd_cartridge(config_path: &Path, ids: &[Uuid], out: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let store = Store::open(&config.metadata_path)
        .with_context(|| format!("open store at {}", config.metadata_path.display()))?;

    let requested: Vec<PackageId> = ids
        .iter()
        .map(|uuid| {
            store
                .get(*uuid)
                .map(|pkg| pkg.id())
                .ok_or_else(|| anyhow::anyhow!("uuid {uuid} is not present in the store"))
        })
        .collect::<Result<_>>()?;

    let transport = HttpContentTransport::new(std::time::Duration::from_secs(config.batch_http_timeout_secs))
        .context("build content transport")?;
    let content = ContentStore::new(&config.content_path, transport, UrlRewritePolicy::PreferMu);

    let file = std::fs::File::create(out).with_context(|| format!("create {}", out.display()))?;
    let report = wsync_cartridge::export_cartridge(&store, &content, &requested, file)
        .await
        .context("export cartridge")?;
    tracing::info!(
        target: "wsyncd",
        updates = report.update_count,
        files = report.file_count,
        path = %out.display(),
        "wrote cartridge"
    );
    Ok(())
}

fn cmd_schema(kind: SchemaArg) -> Result<()> {
    let json = match kind {
        SchemaArg::Config => serde_json::to_string_pretty(&schema_for!(WsyncConfig))?,
        SchemaArg::Filter => serde_json::to_string_pretty(&schema_for!(MetadataFilter))?,
    };
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_sync_with_defaults() {
        let cli = Cli::parse_from(["wsyncd", "sync"]);
        match cli.command {
            Commands::Sync { config, categories_only, no_content, .. } => {
                assert_eq!(config, PathBuf::from("wsyncd.toml"));
                assert!(!categories_only);
                assert!(!no_content);
            }
            other => panic!("expected Sync, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_cartridge_ids() {
        let cli = Cli::parse_from([
            "wsyncd",
            "cartridge",
            "--id",
            "00000000-0000-0000-0000-000000000001",
            "--id",
            "00000000-0000-0000-0000-000000000002",
            "--out",
            "out.cab",
        ]);
        match cli.command {
            Commands::Cartridge { ids, out, .. } => {
                assert_eq!(ids.len(), 2);
                assert_eq!(out, PathBuf::from("out.cab"));
            }
            other => panic!("expected Cartridge, got {other:?}"),
        }
    }
}
